//! JSON-RPC 2.0 / HTTP transport to bot endpoints: `Ping`, `Call`, and
//! `Notify`, each with a deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use merknera_protocol::{JsonRpcRequest, JsonRpcResponse, STATUS_PING_METHOD};
use serde_json::Value;

use crate::error::RpcError;

/// Default deadline for `Ping`.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(30);
/// Default deadline for `Call`/`Notify`.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Distinguishes a deadline overrun from any other transport failure, so
/// callers can tell "bot is slow" apart from "bot is unreachable".
fn into_rpc_error(error: reqwest::Error) -> RpcError {
    if error.is_timeout() {
        RpcError::Timeout
    } else {
        RpcError::Network(error)
    }
}

/// Calls a bot's JSON-RPC endpoint over HTTP. One instance is shared across
/// workers; it carries only a `reqwest::Client` (itself pool-backed) and a
/// monotonic request-id counter.
pub struct RpcTransport {
    client: reqwest::Client,
    next_id: AtomicU64,
    ping_timeout: Duration,
    call_timeout: Duration,
}

impl RpcTransport {
    pub fn new(ping_timeout: Duration, call_timeout: Duration) -> Self {
        RpcTransport {
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            ping_timeout,
            call_timeout,
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// POSTs `Status.Ping`. Any 2xx HTTP response counts as online; network
    /// errors, non-2xx statuses, and exceeding the deadline all fail.
    #[tracing::instrument(skip(self), fields(endpoint))]
    pub async fn ping(&self, endpoint: &str) -> Result<(), RpcError> {
        let request = JsonRpcRequest::new(self.next_request_id(), STATUS_PING_METHOD, Value::Null);
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&request)
            .timeout(self.ping_timeout)
            .send()
            .await
            .map_err(into_rpc_error)?;

        if !response.status().is_success() {
            return Err(RpcError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }

    /// POSTs a JSON-RPC request and waits for a response. Fails on network
    /// error, non-OK HTTP, a malformed body, or a present `error` field.
    #[tracing::instrument(skip(self, params), fields(endpoint, method))]
    pub async fn call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&request)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(into_rpc_error)?;

        if !response.status().is_success() {
            return Err(RpcError::HttpStatus(response.status().as_u16()));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::MalformedBody(e.to_string()))?;

        if let Some(message) = body.error {
            return Err(RpcError::RemoteError(message));
        }
        body.result.ok_or_else(|| {
            RpcError::RemoteError("response had neither result nor error".to_string())
        })
    }

    /// POSTs a JSON-RPC request and returns immediately after dispatch,
    /// discarding the response. Used for the fire-and-forget
    /// `{Namespace}.Complete` and `{Namespace}.Error` notifications.
    #[tracing::instrument(skip(self, params), fields(endpoint, method))]
    pub async fn notify(&self, endpoint: &str, method: &str, params: Value) {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        let result = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&request)
            .timeout(self.call_timeout)
            .send()
            .await;

        if let Err(error) = result {
            tracing::warn!(?error, endpoint, method, "notify failed, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> RpcTransport {
        RpcTransport::new(Duration::from_secs(1), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn ping_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        transport().ping(&format!("{}/rpc", server.uri())).await.unwrap();
    }

    #[tokio::test]
    async fn ping_fails_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let error = transport().ping(&format!("{}/rpc", server.uri())).await.unwrap_err();
        assert!(matches!(error, RpcError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn call_returns_result_value() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"position": 4}
            })))
            .mount(&server)
            .await;

        let result = transport()
            .call(&format!("{}/rpc", server.uri()), "TicTacToe.NextMove", json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!({"position": 4}));
    }

    #[tokio::test]
    async fn call_fails_on_jsonrpc_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": "illegal move"
            })))
            .mount(&server)
            .await;

        let error = transport()
            .call(&format!("{}/rpc", server.uri()), "TicTacToe.NextMove", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(error, RpcError::RemoteError(ref m) if m == "illegal move"));
    }

    #[tokio::test]
    async fn ping_reports_timeout_distinctly_from_other_network_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let transport = RpcTransport::new(Duration::from_millis(20), Duration::from_secs(1));
        let error = transport.ping(&format!("{}/rpc", server.uri())).await.unwrap_err();
        assert!(matches!(error, RpcError::Timeout));
    }

    #[tokio::test]
    async fn notify_ignores_transport_errors() {
        let transport = transport();
        // Nothing listening on this port; notify must not panic or block.
        transport.notify("http://127.0.0.1:1/rpc", "TicTacToe.Error", json!({})).await;
    }
}
