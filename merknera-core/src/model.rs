//! The domain entities: game types, users, bots, games, game-players and
//! moves, plus their status enums.
//!
//! Status enums are written out to the exact uppercase strings the store
//! and the wire protocol expect (`"AWAITING"`, `"ONLINE"`, …), so they carry
//! an explicit `Display`/`FromStr` pair rather than deriving from `Debug`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                $name(value)
            }
        }
    };
}

id_newtype!(GameTypeId);
id_newtype!(UserId);
id_newtype!(UserTokenId);
id_newtype!(BotId);
id_newtype!(GameId);
id_newtype!(GamePlayerId);
id_newtype!(MoveId);

/// A registered game type, e.g. Tic-Tac-Toe. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameType {
    pub id: GameTypeId,
    pub mnemonic: String,
    pub display_name: String,
}

/// A human account, created on first successful OIDC login (login itself
/// is out of this crate's scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
    Current,
    Revoked,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenStatus::Current => "CURRENT",
            TokenStatus::Revoked => "REVOKED",
        })
    }
}

impl FromStr for TokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CURRENT" => Ok(TokenStatus::Current),
            "REVOKED" => Ok(TokenStatus::Revoked),
            other => Err(format!("unknown token status {other:?}")),
        }
    }
}

/// An opaque bearer token used by bot-registration RPCs to authenticate the
/// owning user. Revoked tokens cannot authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserToken {
    pub id: UserTokenId,
    pub user: UserId,
    pub token: String,
    pub description: String,
    pub status: TokenStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Online,
    Offline,
    Error,
    Superseded,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BotStatus::Online => "ONLINE",
            BotStatus::Offline => "OFFLINE",
            BotStatus::Error => "ERROR",
            BotStatus::Superseded => "SUPERSEDED",
        })
    }
}

impl FromStr for BotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(BotStatus::Online),
            "OFFLINE" => Ok(BotStatus::Offline),
            "ERROR" => Ok(BotStatus::Error),
            "SUPERSEDED" => Ok(BotStatus::Superseded),
            other => Err(format!("unknown bot status {other:?}")),
        }
    }
}

/// A single registered bot version. At most one non-SUPERSEDED row exists
/// per bot name at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub name: String,
    pub version: String,
    pub game_type: GameTypeId,
    pub owner: UserId,
    pub endpoint: String,
    pub description: Option<String>,
    pub status: BotStatus,
    pub last_online: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    NotStarted,
    InProgress,
    Complete,
    Superseded,
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GameStatus::NotStarted => "NOT STARTED",
            GameStatus::InProgress => "IN PROGRESS",
            GameStatus::Complete => "COMPLETE",
            GameStatus::Superseded => "SUPERSEDED",
        })
    }
}

impl FromStr for GameStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT STARTED" => Ok(GameStatus::NotStarted),
            "IN PROGRESS" => Ok(GameStatus::InProgress),
            "COMPLETE" => Ok(GameStatus::Complete),
            "SUPERSEDED" => Ok(GameStatus::Superseded),
            other => Err(format!("unknown game status {other:?}")),
        }
    }
}

/// A single scheduled match between two or more bots of the same game type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub game_type: GameTypeId,
    pub status: GameStatus,
}

/// Identifies which bot plays in which slot of a game. `play_sequence` is
/// 1-based and unique within the game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamePlayer {
    pub id: GamePlayerId,
    pub game: GameId,
    pub bot: BotId,
    pub play_sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveStatus {
    Awaiting,
    Complete,
    Superseded,
}

impl fmt::Display for MoveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MoveStatus::Awaiting => "AWAITING",
            MoveStatus::Complete => "COMPLETE",
            MoveStatus::Superseded => "SUPERSEDED",
        })
    }
}

impl FromStr for MoveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWAITING" => Ok(MoveStatus::Awaiting),
            "COMPLETE" => Ok(MoveStatus::Complete),
            "SUPERSEDED" => Ok(MoveStatus::Superseded),
            other => Err(format!("unknown move status {other:?}")),
        }
    }
}

/// One row representing "it is this player's turn". `game_state` is an
/// opaque JSON snapshot: for AWAITING, the pre-move state shown to the
/// bot; for COMPLETE, the post-move state the bot produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Move {
    pub id: MoveId,
    pub game_player: GamePlayerId,
    pub status: MoveStatus,
    pub winner: bool,
    pub game_state: serde_json::Value,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
}

/// The result of resolving Move -> GamePlayer -> (Bot, Game) -> GameType
/// in one store call.
#[derive(Debug, Clone)]
pub struct MoveChain {
    pub mv: Move,
    pub game_player: GamePlayer,
    pub bot: Bot,
    pub game: Game,
    pub game_type: GameType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_status_round_trips_through_display_and_from_str() {
        for status in [
            BotStatus::Online,
            BotStatus::Offline,
            BotStatus::Error,
            BotStatus::Superseded,
        ] {
            let rendered = status.to_string();
            assert_eq!(rendered.parse::<BotStatus>().unwrap(), status);
        }
    }

    #[test]
    fn game_status_uses_spaced_strings() {
        assert_eq!(GameStatus::NotStarted.to_string(), "NOT STARTED");
        assert_eq!(GameStatus::InProgress.to_string(), "IN PROGRESS");
        assert_eq!("IN PROGRESS".parse::<GameStatus>().unwrap(), GameStatus::InProgress);
    }

    #[test]
    fn move_status_rejects_unknown_strings() {
        assert!("BOGUS".parse::<MoveStatus>().is_err());
    }
}
