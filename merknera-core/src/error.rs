//! The error types for each layer of the pipeline. Library code returns
//! these typed errors; `merknera-server`'s `main` is the only place that
//! flattens them into a human-readable report.

use thiserror::Error;

use crate::model::{BotId, GameId, MoveId};

/// Errors from the `Store` trait and its implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no row found for {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("state snapshot failed to (de)serialize: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from `RpcTransport::Ping` / `Call` / `Notify`.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("network error calling bot: {0}")]
    Network(#[from] reqwest::Error),
    #[error("bot returned non-OK HTTP status {0}")]
    HttpStatus(u16),
    #[error("malformed JSON-RPC response body: {0}")]
    MalformedBody(String),
    #[error("bot returned a JSON-RPC error: {0}")]
    RemoteError(String),
    #[error("call exceeded its deadline")]
    Timeout,
}

/// Errors surfaced synchronously to the Registration Coordinator's caller.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("unknown user")]
    UnknownUser,
    #[error("unknown game")]
    UnknownGame,
    #[error("name taken")]
    NameTaken,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("provider error: {0}")]
    Provider(String),
}

/// Errors raised inside a worker's move-processing pipeline. None of these
/// propagate to a user; they drive the bot-status and move-status
/// transitions a worker applies along its failure paths.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store lookup failed for move {move_id:?}: {source}")]
    Store {
        move_id: MoveId,
        #[source]
        source: StoreError,
    },
    #[error("bot {bot_id:?} ping failed: {source}")]
    PingFailed {
        bot_id: BotId,
        #[source]
        source: RpcError,
    },
    #[error("bot {bot_id:?} call failed: {source}")]
    CallFailed {
        bot_id: BotId,
        #[source]
        source: RpcError,
    },
    #[error("provider could not build params for move {move_id:?}: {message}")]
    RequestParams { move_id: MoveId, message: String },
    #[error("provider could not process response for move {move_id:?}: {message}")]
    ProcessResponse { move_id: MoveId, message: String },
}

/// Configuration-time errors: missing provider, missing method handler,
/// malformed key material. These are fatal at boot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no game provider registered for mnemonic {0:?}")]
    UnknownMnemonic(String),
    #[error("no game provider registered for RPC namespace {0:?}")]
    UnknownNamespace(String),
    #[error("provider {provider:?} has no handler for method {method:?}")]
    MissingMethodHandler { provider: String, method: String },
    #[error("game {0:?} has no players")]
    EmptyGame(GameId),
}
