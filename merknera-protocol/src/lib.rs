//! The wire types shared between the orchestration core and any game
//! provider crate: the JSON-RPC 2.0 envelope bots are called through, the
//! standard methods every bot must expose, and the registration RPC shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every bot exposes this no-op method; any 2xx HTTP response counts as
/// "online" regardless of the body.
pub const STATUS_PING_METHOD: &str = "Status.Ping";

/// One-way notification suffix sent to a bot's `{Namespace}.Complete`
/// method when a game it is playing has ended.
pub const COMPLETE_METHOD_SUFFIX: &str = "Complete";

/// One-way notification suffix sent to a bot's `{Namespace}.Error` method.
pub const ERROR_METHOD_SUFFIX: &str = "Error";

/// A JSON-RPC 2.0 request, as sent by the RPC transport to a bot endpoint.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response body. Bots may return either a `result` or an
/// `error`; the core treats the presence of `error` as a call failure
/// regardless of HTTP status.
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The tagged result a provider's response handler produces for one move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GameResult {
    Win,
    Draw,
    Undecided,
}

/// Payload for the bot-registration RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterBotRequest {
    pub botname: String,
    pub botversion: String,
    pub game: String,
    pub token: String,
    pub rpcendpoint: String,
    pub programminglanguage: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
}

/// Response to a successful registration RPC.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterBotResponse {
    pub message: String,
}

/// Builds the dotted RPC method name `{namespace}.{suffix}`, e.g.
/// `"TicTacToe.NextMove"`.
pub fn namespaced(namespace: &str, suffix: &str) -> String {
    format!("{namespace}.{suffix}")
}

/// Splits a dotted RPC method name into its namespace and bare method,
/// e.g. `"TicTacToe.NextMove"` -> `("TicTacToe", "NextMove")`.
pub fn split_namespace(method: &str) -> Option<(&str, &str)> {
    method.split_once('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_round_trips_through_split() {
        let method = namespaced("TicTacToe", "NextMove");
        assert_eq!(method, "TicTacToe.NextMove");
        assert_eq!(split_namespace(&method), Some(("TicTacToe", "NextMove")));
    }

    #[test]
    fn split_namespace_rejects_bare_method() {
        assert_eq!(split_namespace("Ping"), None);
    }

    #[test]
    fn game_result_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&GameResult::Win).unwrap(), "\"WIN\"");
        assert_eq!(
            serde_json::to_string(&GameResult::Undecided).unwrap(),
            "\"UNDECIDED\""
        );
    }
}
