//! The SQLite-backed [`Store`] used by the running server. Runtime-checked
//! `sqlx::query`/`query_as` rather than the compile-time `query!` macros,
//! since there is no live database available at build time here.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;

use crate::error::StoreError;
use crate::model::{
    Bot, BotId, BotStatus, Game, GameId, GamePlayer, GamePlayerId, GameStatus, GameType,
    GameTypeId, Move, MoveChain, MoveId, MoveStatus, User, UserId, UserToken, UserTokenId,
};

use super::{NewBot, Store};

/// Embedded migrations, applied once at boot by `SqliteStore::connect`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// A SQLite-backed [`Store`]. Cloning is cheap: the pool is reference
/// counted internally by `sqlx`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path`, applies any
    /// pending migrations, and returns a ready store.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await?;
        MIGRATOR.run(&pool).await.map_err(|e| StoreError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(SqliteStore { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }
}

#[derive(FromRow)]
struct GameTypeRow {
    id: i64,
    mnemonic: String,
    display_name: String,
}

impl From<GameTypeRow> for GameType {
    fn from(row: GameTypeRow) -> Self {
        GameType {
            id: GameTypeId(row.id),
            mnemonic: row.mnemonic,
            display_name: row.display_name,
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    display_name: String,
    email: String,
    image_url: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            display_name: row.display_name,
            email: row.email,
            image_url: row.image_url,
        }
    }
}

#[derive(FromRow)]
struct UserTokenRow {
    id: i64,
    user_id: i64,
    token: String,
    description: String,
    status: String,
}

fn user_token_from_row(row: UserTokenRow) -> Result<UserToken, StoreError> {
    Ok(UserToken {
        id: UserTokenId(row.id),
        user: UserId(row.user_id),
        token: row.token,
        description: row.description,
        status: crate::model::TokenStatus::from_str(&row.status)
            .map_err(StoreError::NotFound)?,
    })
}

#[derive(FromRow)]
struct BotRow {
    id: i64,
    name: String,
    version: String,
    game_type_id: i64,
    owner_id: i64,
    endpoint: String,
    description: Option<String>,
    status: String,
    last_online: Option<OffsetDateTime>,
}

fn bot_from_row(row: BotRow) -> Result<Bot, StoreError> {
    Ok(Bot {
        id: BotId(row.id),
        name: row.name,
        version: row.version,
        game_type: GameTypeId(row.game_type_id),
        owner: UserId(row.owner_id),
        endpoint: row.endpoint,
        description: row.description,
        status: BotStatus::from_str(&row.status).map_err(StoreError::NotFound)?,
        last_online: row.last_online,
    })
}

#[derive(FromRow)]
struct GameRow {
    id: i64,
    game_type_id: i64,
    status: String,
}

fn game_from_row(row: GameRow) -> Result<Game, StoreError> {
    Ok(Game {
        id: GameId(row.id),
        game_type: GameTypeId(row.game_type_id),
        status: GameStatus::from_str(&row.status).map_err(StoreError::NotFound)?,
    })
}

#[derive(FromRow)]
struct GamePlayerRow {
    id: i64,
    game_id: i64,
    bot_id: i64,
    play_sequence: i64,
}

impl From<GamePlayerRow> for GamePlayer {
    fn from(row: GamePlayerRow) -> Self {
        GamePlayer {
            id: GamePlayerId(row.id),
            game: GameId(row.game_id),
            bot: BotId(row.bot_id),
            play_sequence: row.play_sequence as u32,
        }
    }
}

#[derive(FromRow)]
struct MoveRow {
    id: i64,
    game_player_id: i64,
    status: String,
    winner: bool,
    game_state: String,
    started_at: OffsetDateTime,
    ended_at: Option<OffsetDateTime>,
}

fn move_from_row(row: MoveRow) -> Result<Move, StoreError> {
    Ok(Move {
        id: MoveId(row.id),
        game_player: GamePlayerId(row.game_player_id),
        status: MoveStatus::from_str(&row.status).map_err(StoreError::NotFound)?,
        winner: row.winner,
        game_state: serde_json::from_str(&row.game_state)?,
        started_at: row.started_at,
        ended_at: row.ended_at,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_game_type(
        &self,
        mnemonic: &str,
        display_name: &str,
    ) -> Result<GameType, StoreError> {
        if let Some(existing) = self.game_type_by_mnemonic(mnemonic).await? {
            return Ok(existing);
        }
        let row = sqlx::query_as::<_, GameTypeRow>(
            "INSERT INTO game_types (mnemonic, display_name) VALUES (?, ?) RETURNING id, mnemonic, display_name",
        )
        .bind(mnemonic)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn game_type_by_mnemonic(&self, mnemonic: &str) -> Result<Option<GameType>, StoreError> {
        let row = sqlx::query_as::<_, GameTypeRow>(
            "SELECT id, mnemonic, display_name FROM game_types WHERE mnemonic = ?",
        )
        .bind(mnemonic)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn user_by_current_token(
        &self,
        token: &str,
    ) -> Result<Option<(User, UserToken)>, StoreError> {
        let Some(token_row) = sqlx::query_as::<_, UserTokenRow>(
            "SELECT id, user_id, token, description, status FROM user_tokens WHERE token = ? AND status = 'CURRENT'",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let user_row = sqlx::query_as::<_, UserRow>(
            "SELECT id, display_name, email, image_url FROM users WHERE id = ?",
        )
        .bind(token_row.user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some((user_row.into(), user_token_from_row(token_row)?)))
    }

    async fn bot_by_name_non_superseded(&self, name: &str) -> Result<Option<Bot>, StoreError> {
        let row = sqlx::query_as::<_, BotRow>(
            "SELECT id, name, version, game_type_id, owner_id, endpoint, description, status, last_online \
             FROM bots WHERE name = ? AND status != 'SUPERSEDED'",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(bot_from_row).transpose()
    }

    async fn bot_by_id(&self, bot_id: BotId) -> Result<Bot, StoreError> {
        let row = sqlx::query_as::<_, BotRow>(
            "SELECT id, name, version, game_type_id, owner_id, endpoint, description, status, last_online \
             FROM bots WHERE id = ?",
        )
        .bind(bot_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("bot {bot_id:?}")))?;
        bot_from_row(row)
    }

    async fn bots_for_game_type_non_superseded(
        &self,
        game_type: GameTypeId,
        exclude: Option<BotId>,
    ) -> Result<Vec<Bot>, StoreError> {
        let rows = sqlx::query_as::<_, BotRow>(
            "SELECT id, name, version, game_type_id, owner_id, endpoint, description, status, last_online \
             FROM bots WHERE game_type_id = ? AND status != 'SUPERSEDED' AND id != ?",
        )
        .bind(game_type.0)
        .bind(exclude.map(|b| b.0).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(bot_from_row).collect()
    }

    async fn all_non_superseded_bots(&self) -> Result<Vec<Bot>, StoreError> {
        let rows = sqlx::query_as::<_, BotRow>(
            "SELECT id, name, version, game_type_id, owner_id, endpoint, description, status, last_online \
             FROM bots WHERE status != 'SUPERSEDED'",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(bot_from_row).collect()
    }

    async fn insert_bot(&self, new_bot: NewBot) -> Result<Bot, StoreError> {
        let row = sqlx::query_as::<_, BotRow>(
            "INSERT INTO bots (name, version, game_type_id, owner_id, endpoint, description, status, last_online) \
             VALUES (?, ?, ?, ?, ?, ?, 'ONLINE', ?) \
             RETURNING id, name, version, game_type_id, owner_id, endpoint, description, status, last_online",
        )
        .bind(&new_bot.name)
        .bind(&new_bot.version)
        .bind(new_bot.game_type.0)
        .bind(new_bot.owner.0)
        .bind(&new_bot.endpoint)
        .bind(&new_bot.description)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;
        bot_from_row(row)
    }

    async fn update_bot_registration(
        &self,
        bot_id: BotId,
        endpoint: &str,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE bots SET endpoint = ?, description = ?, status = 'ONLINE', last_online = ? WHERE id = ?",
        )
        .bind(endpoint)
        .bind(description)
        .bind(OffsetDateTime::now_utc())
        .bind(bot_id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("bot {bot_id:?}")));
        }
        Ok(())
    }

    async fn set_bot_status(&self, bot_id: BotId, status: BotStatus) -> Result<(), StoreError> {
        let result = if status == BotStatus::Online {
            sqlx::query("UPDATE bots SET status = ?, last_online = ? WHERE id = ?")
                .bind(status.to_string())
                .bind(OffsetDateTime::now_utc())
                .bind(bot_id.0)
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("UPDATE bots SET status = ? WHERE id = ?")
                .bind(status.to_string())
                .bind(bot_id.0)
                .execute(&self.pool)
                .await?
        };
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("bot {bot_id:?}")));
        }
        Ok(())
    }

    async fn supersede_bot_and_games(&self, bot_name: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE bots SET status = 'SUPERSEDED' WHERE name = ? AND status != 'SUPERSEDED'")
            .bind(bot_name)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE games SET status = 'SUPERSEDED' \
             WHERE status != 'COMPLETE' AND id IN ( \
                 SELECT gp.game_id FROM game_players gp \
                 JOIN bots b ON b.id = gp.bot_id \
                 WHERE b.name = ? \
             )",
        )
        .bind(bot_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE moves SET status = 'SUPERSEDED' \
             WHERE status != 'COMPLETE' AND game_player_id IN ( \
                 SELECT gp.id FROM game_players gp \
                 JOIN games g ON g.id = gp.game_id \
                 WHERE g.status = 'SUPERSEDED' \
             )",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_game(
        &self,
        game_type: GameTypeId,
        players: &[BotId],
    ) -> Result<(Game, Vec<GamePlayer>), StoreError> {
        let mut tx = self.pool.begin().await?;

        let game_row = sqlx::query_as::<_, GameRow>(
            "INSERT INTO games (game_type_id, status) VALUES (?, 'NOT STARTED') RETURNING id, game_type_id, status",
        )
        .bind(game_type.0)
        .fetch_one(&mut *tx)
        .await?;
        let game = game_from_row(game_row)?;

        let mut created = Vec::with_capacity(players.len());
        for (index, bot) in players.iter().enumerate() {
            let row = sqlx::query_as::<_, GamePlayerRow>(
                "INSERT INTO game_players (game_id, bot_id, play_sequence) VALUES (?, ?, ?) \
                 RETURNING id, game_id, bot_id, play_sequence",
            )
            .bind(game.id.0)
            .bind(bot.0)
            .bind((index + 1) as i64)
            .fetch_one(&mut *tx)
            .await?;
            created.push(row.into());
        }

        tx.commit().await?;
        Ok((game, created))
    }

    async fn game_by_id(&self, game_id: GameId) -> Result<Game, StoreError> {
        let row = sqlx::query_as::<_, GameRow>(
            "SELECT id, game_type_id, status FROM games WHERE id = ?",
        )
        .bind(game_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("game {game_id:?}")))?;
        game_from_row(row)
    }

    async fn game_players(&self, game_id: GameId) -> Result<Vec<GamePlayer>, StoreError> {
        let rows = sqlx::query_as::<_, GamePlayerRow>(
            "SELECT id, game_id, bot_id, play_sequence FROM game_players WHERE game_id = ? ORDER BY play_sequence",
        )
        .bind(game_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_game_in_progress(&self, game_id: GameId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE games SET status = 'IN PROGRESS' WHERE id = ?")
            .bind(game_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("game {game_id:?}")));
        }
        Ok(())
    }

    async fn mark_game_complete(&self, game_id: GameId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE games SET status = 'COMPLETE' WHERE id = ?")
            .bind(game_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("game {game_id:?}")));
        }
        Ok(())
    }

    async fn create_move(
        &self,
        game_player: GamePlayerId,
        state: Value,
    ) -> Result<Move, StoreError> {
        let state_text = serde_json::to_string(&state)?;
        let row = sqlx::query_as::<_, MoveRow>(
            "INSERT INTO moves (game_player_id, status, winner, game_state, started_at) \
             VALUES (?, 'AWAITING', 0, ?, ?) \
             RETURNING id, game_player_id, status, winner, game_state, started_at, ended_at",
        )
        .bind(game_player.0)
        .bind(state_text)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;
        move_from_row(row)
    }

    async fn move_by_id(&self, move_id: MoveId) -> Result<Move, StoreError> {
        let row = sqlx::query_as::<_, MoveRow>(
            "SELECT id, game_player_id, status, winner, game_state, started_at, ended_at FROM moves WHERE id = ?",
        )
        .bind(move_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("move {move_id:?}")))?;
        move_from_row(row)
    }

    async fn complete_move(
        &self,
        move_id: MoveId,
        new_state: Value,
        winner: bool,
    ) -> Result<(), StoreError> {
        let state_text = serde_json::to_string(&new_state)?;
        // State is written in the same statement as the status flip so no
        // reader can observe COMPLETE with a stale game_state.
        let result = sqlx::query(
            "UPDATE moves SET game_state = ?, status = 'COMPLETE', winner = ?, ended_at = ? WHERE id = ?",
        )
        .bind(state_text)
        .bind(winner)
        .bind(OffsetDateTime::now_utc())
        .bind(move_id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("move {move_id:?}")));
        }
        Ok(())
    }

    async fn supersede_move(&self, move_id: MoveId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE moves SET status = 'SUPERSEDED' WHERE id = ?")
            .bind(move_id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("move {move_id:?}")));
        }
        Ok(())
    }

    async fn awaiting_moves(&self) -> Result<Vec<Move>, StoreError> {
        let rows = sqlx::query_as::<_, MoveRow>(
            "SELECT id, game_player_id, status, winner, game_state, started_at, ended_at FROM moves WHERE status = 'AWAITING'",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(move_from_row).collect()
    }

    async fn awaiting_moves_for_bot(&self, bot_id: BotId) -> Result<Vec<Move>, StoreError> {
        let rows = sqlx::query_as::<_, MoveRow>(
            "SELECT m.id, m.game_player_id, m.status, m.winner, m.game_state, m.started_at, m.ended_at \
             FROM moves m JOIN game_players gp ON gp.id = m.game_player_id \
             WHERE m.status = 'AWAITING' AND gp.bot_id = ?",
        )
        .bind(bot_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(move_from_row).collect()
    }

    async fn move_chain(&self, move_id: MoveId) -> Result<MoveChain, StoreError> {
        let mv = self.move_by_id(move_id).await?;

        let game_player_row = sqlx::query_as::<_, GamePlayerRow>(
            "SELECT id, game_id, bot_id, play_sequence FROM game_players WHERE id = ?",
        )
        .bind(mv.game_player.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("game player for move {move_id:?}")))?;
        let game_player: GamePlayer = game_player_row.into();

        let bot = self.bot_by_id(game_player.bot).await?;
        let game = self.game_by_id(game_player.game).await?;

        let game_type_row = sqlx::query_as::<_, GameTypeRow>(
            "SELECT id, mnemonic, display_name FROM game_types WHERE id = ?",
        )
        .bind(game.game_type.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("game type {:?}", game.game_type)))?;

        Ok(MoveChain {
            mv,
            game_player,
            bot,
            game,
            game_type: game_type_row.into(),
        })
    }
}
