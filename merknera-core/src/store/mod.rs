//! The persistence contract. The core never assumes in-memory relationship
//! pre-loading: every lookup goes through one of these trait methods,
//! implemented here against SQLite ([`sqlite`]) for the running server and
//! against an in-memory map ([`memory`]) for tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::model::{
    Bot, BotId, BotStatus, Game, GameId, GamePlayer, GamePlayerId, GameType, GameTypeId, Move,
    MoveChain, MoveId, User, UserToken,
};

/// Fields needed to insert a freshly-registered bot.
pub struct NewBot {
    pub name: String,
    pub version: String,
    pub game_type: GameTypeId,
    pub owner: crate::model::UserId,
    pub endpoint: String,
    pub description: Option<String>,
}

/// The relational persistence contract the orchestration pipeline depends
/// on. Implementations are responsible for their own transactionality;
/// [`Store::supersede_bot_and_games`] in particular must be atomic.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_game_type(
        &self,
        mnemonic: &str,
        display_name: &str,
    ) -> Result<GameType, StoreError>;

    async fn game_type_by_mnemonic(&self, mnemonic: &str) -> Result<Option<GameType>, StoreError>;

    /// Resolves a user by a CURRENT (non-revoked) token string.
    async fn user_by_current_token(
        &self,
        token: &str,
    ) -> Result<Option<(User, UserToken)>, StoreError>;

    async fn bot_by_name_non_superseded(&self, name: &str) -> Result<Option<Bot>, StoreError>;

    async fn bot_by_id(&self, bot_id: BotId) -> Result<Bot, StoreError>;

    async fn bots_for_game_type_non_superseded(
        &self,
        game_type: GameTypeId,
        exclude: Option<BotId>,
    ) -> Result<Vec<Bot>, StoreError>;

    async fn all_non_superseded_bots(&self) -> Result<Vec<Bot>, StoreError>;

    async fn insert_bot(&self, new_bot: NewBot) -> Result<Bot, StoreError>;

    async fn update_bot_registration(
        &self,
        bot_id: BotId,
        endpoint: &str,
        description: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn set_bot_status(&self, bot_id: BotId, status: BotStatus) -> Result<(), StoreError>;

    /// Atomically supersedes every non-SUPERSEDED Bot row with this name,
    /// every non-COMPLETE Game that had one of those bots as a player, and
    /// every non-COMPLETE Move belonging to those games.
    async fn supersede_bot_and_games(&self, bot_name: &str) -> Result<(), StoreError>;

    async fn create_game(
        &self,
        game_type: GameTypeId,
        players: &[BotId],
    ) -> Result<(Game, Vec<GamePlayer>), StoreError>;

    async fn game_by_id(&self, game_id: GameId) -> Result<Game, StoreError>;

    async fn game_players(&self, game_id: GameId) -> Result<Vec<GamePlayer>, StoreError>;

    async fn mark_game_in_progress(&self, game_id: GameId) -> Result<(), StoreError>;

    async fn mark_game_complete(&self, game_id: GameId) -> Result<(), StoreError>;

    async fn create_move(
        &self,
        game_player: GamePlayerId,
        state: Value,
    ) -> Result<Move, StoreError>;

    async fn move_by_id(&self, move_id: MoveId) -> Result<Move, StoreError>;

    /// Updates state then status (AWAITING -> COMPLETE): an observer that
    /// sees COMPLETE never sees a stale state snapshot.
    async fn complete_move(
        &self,
        move_id: MoveId,
        new_state: Value,
        winner: bool,
    ) -> Result<(), StoreError>;

    async fn supersede_move(&self, move_id: MoveId) -> Result<(), StoreError>;

    async fn awaiting_moves(&self) -> Result<Vec<Move>, StoreError>;

    async fn awaiting_moves_for_bot(&self, bot_id: BotId) -> Result<Vec<Move>, StoreError>;

    /// Resolves Move -> GamePlayer -> (Bot, Game) -> GameType in one call.
    async fn move_chain(&self, move_id: MoveId) -> Result<MoveChain, StoreError>;
}
