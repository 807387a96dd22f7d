//! An in-memory [`Store`] implementation, used only by tests so the
//! orchestration pipeline can be exercised without a live SQLite file.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::{
    Bot, BotId, BotStatus, Game, GameId, GamePlayer, GamePlayerId, GameStatus, GameType,
    GameTypeId, Move, MoveChain, MoveId, MoveStatus, User, UserId, UserToken, UserTokenId,
};

use super::{NewBot, Store};

#[derive(Default)]
struct Tables {
    game_types: Vec<GameType>,
    users: Vec<User>,
    tokens: Vec<UserToken>,
    bots: Vec<Bot>,
    games: Vec<Game>,
    game_players: Vec<GamePlayer>,
    moves: Vec<Move>,
    next_id: i64,
}

impl Tables {
    fn alloc(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// An in-memory stand-in for the relational store, guarded by a single
/// mutex — sufficient for tests, where contention is incidental rather
/// than the point.
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: registers a user and a CURRENT token for them, returning
    /// the token string.
    pub async fn seed_user_with_token(&self, display_name: &str, email: &str, token: &str) -> UserId {
        let mut tables = self.tables.lock().await;
        let user_id = UserId(tables.alloc());
        tables.users.push(User {
            id: user_id,
            display_name: display_name.to_string(),
            email: email.to_string(),
            image_url: None,
        });
        let token_id = UserTokenId(tables.alloc());
        tables.tokens.push(UserToken {
            id: token_id,
            user: user_id,
            token: token.to_string(),
            description: "seeded".to_string(),
            status: crate::model::TokenStatus::Current,
        });
        user_id
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_game_type(
        &self,
        mnemonic: &str,
        display_name: &str,
    ) -> Result<GameType, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.game_types.iter().find(|g| g.mnemonic == mnemonic) {
            return Ok(existing.clone());
        }
        let id = GameTypeId(tables.alloc());
        let game_type = GameType {
            id,
            mnemonic: mnemonic.to_string(),
            display_name: display_name.to_string(),
        };
        tables.game_types.push(game_type.clone());
        Ok(game_type)
    }

    async fn game_type_by_mnemonic(&self, mnemonic: &str) -> Result<Option<GameType>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.game_types.iter().find(|g| g.mnemonic == mnemonic).cloned())
    }

    async fn user_by_current_token(
        &self,
        token: &str,
    ) -> Result<Option<(User, UserToken)>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(tok) = tables
            .tokens
            .iter()
            .find(|t| t.token == token && t.status == crate::model::TokenStatus::Current)
        else {
            return Ok(None);
        };
        let user = tables.users.iter().find(|u| u.id == tok.user).cloned();
        Ok(user.map(|u| (u, tok.clone())))
    }

    async fn bot_by_name_non_superseded(&self, name: &str) -> Result<Option<Bot>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bots
            .iter()
            .find(|b| b.name == name && b.status != BotStatus::Superseded)
            .cloned())
    }

    async fn bot_by_id(&self, bot_id: BotId) -> Result<Bot, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .bots
            .iter()
            .find(|b| b.id == bot_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bot {bot_id:?}")))
    }

    async fn bots_for_game_type_non_superseded(
        &self,
        game_type: GameTypeId,
        exclude: Option<BotId>,
    ) -> Result<Vec<Bot>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bots
            .iter()
            .filter(|b| {
                b.game_type == game_type
                    && b.status != BotStatus::Superseded
                    && exclude != Some(b.id)
            })
            .cloned()
            .collect())
    }

    async fn all_non_superseded_bots(&self) -> Result<Vec<Bot>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .bots
            .iter()
            .filter(|b| b.status != BotStatus::Superseded)
            .cloned()
            .collect())
    }

    async fn insert_bot(&self, new_bot: NewBot) -> Result<Bot, StoreError> {
        let mut tables = self.tables.lock().await;
        let id = BotId(tables.alloc());
        let bot = Bot {
            id,
            name: new_bot.name,
            version: new_bot.version,
            game_type: new_bot.game_type,
            owner: new_bot.owner,
            endpoint: new_bot.endpoint,
            description: new_bot.description,
            status: BotStatus::Online,
            last_online: Some(OffsetDateTime::now_utc()),
        };
        tables.bots.push(bot.clone());
        Ok(bot)
    }

    async fn update_bot_registration(
        &self,
        bot_id: BotId,
        endpoint: &str,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let bot = tables
            .bots
            .iter_mut()
            .find(|b| b.id == bot_id)
            .ok_or_else(|| StoreError::NotFound(format!("bot {bot_id:?}")))?;
        bot.endpoint = endpoint.to_string();
        bot.description = description.map(|d| d.to_string());
        bot.status = BotStatus::Online;
        Ok(())
    }

    async fn set_bot_status(&self, bot_id: BotId, status: BotStatus) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let bot = tables
            .bots
            .iter_mut()
            .find(|b| b.id == bot_id)
            .ok_or_else(|| StoreError::NotFound(format!("bot {bot_id:?}")))?;
        bot.status = status;
        if status == BotStatus::Online {
            bot.last_online = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn supersede_bot_and_games(&self, bot_name: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;

        let superseded_bot_ids: Vec<BotId> = tables
            .bots
            .iter()
            .filter(|b| b.name == bot_name && b.status != BotStatus::Superseded)
            .map(|b| b.id)
            .collect();

        for bot in tables.bots.iter_mut() {
            if superseded_bot_ids.contains(&bot.id) {
                bot.status = BotStatus::Superseded;
            }
        }

        let affected_game_ids: Vec<GameId> = tables
            .game_players
            .iter()
            .filter(|gp| superseded_bot_ids.contains(&gp.bot))
            .map(|gp| gp.game)
            .collect();

        for game in tables.games.iter_mut() {
            if affected_game_ids.contains(&game.id) && game.status != GameStatus::Complete {
                game.status = GameStatus::Superseded;
            }
        }

        let superseded_game_ids: Vec<GameId> = tables
            .games
            .iter()
            .filter(|g| affected_game_ids.contains(&g.id) && g.status == GameStatus::Superseded)
            .map(|g| g.id)
            .collect();

        let game_player_ids_in_superseded_games: Vec<GamePlayerId> = tables
            .game_players
            .iter()
            .filter(|gp| superseded_game_ids.contains(&gp.game))
            .map(|gp| gp.id)
            .collect();

        for mv in tables.moves.iter_mut() {
            if mv.status != MoveStatus::Complete
                && game_player_ids_in_superseded_games.contains(&mv.game_player)
            {
                mv.status = MoveStatus::Superseded;
            }
        }

        Ok(())
    }

    async fn create_game(
        &self,
        game_type: GameTypeId,
        players: &[BotId],
    ) -> Result<(Game, Vec<GamePlayer>), StoreError> {
        let mut tables = self.tables.lock().await;
        let game_id = GameId(tables.alloc());
        let game = Game {
            id: game_id,
            game_type,
            status: GameStatus::NotStarted,
        };
        tables.games.push(game.clone());

        let mut created = Vec::with_capacity(players.len());
        for (index, bot) in players.iter().enumerate() {
            let player_id = GamePlayerId(tables.alloc());
            let player = GamePlayer {
                id: player_id,
                game: game_id,
                bot: *bot,
                play_sequence: (index + 1) as u32,
            };
            tables.game_players.push(player.clone());
            created.push(player);
        }

        Ok((game, created))
    }

    async fn game_by_id(&self, game_id: GameId) -> Result<Game, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .games
            .iter()
            .find(|g| g.id == game_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("game {game_id:?}")))
    }

    async fn game_players(&self, game_id: GameId) -> Result<Vec<GamePlayer>, StoreError> {
        let tables = self.tables.lock().await;
        let mut players: Vec<GamePlayer> = tables
            .game_players
            .iter()
            .filter(|gp| gp.game == game_id)
            .cloned()
            .collect();
        players.sort_by_key(|gp| gp.play_sequence);
        Ok(players)
    }

    async fn mark_game_in_progress(&self, game_id: GameId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let game = tables
            .games
            .iter_mut()
            .find(|g| g.id == game_id)
            .ok_or_else(|| StoreError::NotFound(format!("game {game_id:?}")))?;
        game.status = GameStatus::InProgress;
        Ok(())
    }

    async fn mark_game_complete(&self, game_id: GameId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let game = tables
            .games
            .iter_mut()
            .find(|g| g.id == game_id)
            .ok_or_else(|| StoreError::NotFound(format!("game {game_id:?}")))?;
        game.status = GameStatus::Complete;
        Ok(())
    }

    async fn create_move(
        &self,
        game_player: GamePlayerId,
        state: Value,
    ) -> Result<Move, StoreError> {
        let mut tables = self.tables.lock().await;
        let id = MoveId(tables.alloc());
        let mv = Move {
            id,
            game_player,
            status: MoveStatus::Awaiting,
            winner: false,
            game_state: state,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
        };
        tables.moves.push(mv.clone());
        Ok(mv)
    }

    async fn move_by_id(&self, move_id: MoveId) -> Result<Move, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .moves
            .iter()
            .find(|m| m.id == move_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("move {move_id:?}")))
    }

    async fn complete_move(
        &self,
        move_id: MoveId,
        new_state: Value,
        winner: bool,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mv = tables
            .moves
            .iter_mut()
            .find(|m| m.id == move_id)
            .ok_or_else(|| StoreError::NotFound(format!("move {move_id:?}")))?;
        mv.game_state = new_state;
        mv.status = MoveStatus::Complete;
        mv.winner = winner;
        mv.ended_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn supersede_move(&self, move_id: MoveId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let mv = tables
            .moves
            .iter_mut()
            .find(|m| m.id == move_id)
            .ok_or_else(|| StoreError::NotFound(format!("move {move_id:?}")))?;
        mv.status = MoveStatus::Superseded;
        Ok(())
    }

    async fn awaiting_moves(&self) -> Result<Vec<Move>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .moves
            .iter()
            .filter(|m| m.status == MoveStatus::Awaiting)
            .cloned()
            .collect())
    }

    async fn awaiting_moves_for_bot(&self, bot_id: BotId) -> Result<Vec<Move>, StoreError> {
        let tables = self.tables.lock().await;
        let player_ids: Vec<GamePlayerId> = tables
            .game_players
            .iter()
            .filter(|gp| gp.bot == bot_id)
            .map(|gp| gp.id)
            .collect();
        Ok(tables
            .moves
            .iter()
            .filter(|m| m.status == MoveStatus::Awaiting && player_ids.contains(&m.game_player))
            .cloned()
            .collect())
    }

    async fn move_chain(&self, move_id: MoveId) -> Result<MoveChain, StoreError> {
        let tables = self.tables.lock().await;
        let mv = tables
            .moves
            .iter()
            .find(|m| m.id == move_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("move {move_id:?}")))?;
        let game_player = tables
            .game_players
            .iter()
            .find(|gp| gp.id == mv.game_player)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("game player for move {move_id:?}")))?;
        let bot = tables
            .bots
            .iter()
            .find(|b| b.id == game_player.bot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bot {:?}", game_player.bot)))?;
        let game = tables
            .games
            .iter()
            .find(|g| g.id == game_player.game)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("game {:?}", game_player.game)))?;
        let game_type = tables
            .game_types
            .iter()
            .find(|gt| gt.id == game.game_type)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("game type {:?}", game.game_type)))?;
        Ok(MoveChain {
            mv,
            game_player,
            bot,
            game,
            game_type,
        })
    }
}
