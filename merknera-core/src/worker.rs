//! The per-move state machine: one worker processes one move to completion
//! — lease, re-read, resolve, ping, dispatch, call, apply, persist —
//! before becoming ready for another token.

use std::sync::Arc;

use merknera_protocol::GameResult;
use serde_json::Value;

use crate::dispatch::{MoveQueueSender, MoveToken, WorkerHandle};
use crate::error::WorkerError;
use crate::model::{BotId, BotStatus, MoveId, MoveStatus};
use crate::move_lock::MoveLockManager;
use crate::provider::{resolve_method, ProviderRegistry};
use crate::rpc::RpcTransport;
use crate::store::Store;

/// Everything one worker needs to carry a move from AWAITING to its next
/// state, shared read-only (behind `Arc`) across the whole pool.
pub struct WorkerContext {
    pub store: Arc<dyn Store>,
    pub rpc: Arc<RpcTransport>,
    pub providers: Arc<ProviderRegistry>,
    pub locks: Arc<MoveLockManager>,
    pub queue: MoveQueueSender,
}

/// Spawns a worker task bound to `handle`. The task runs until the
/// dispatcher's shutdown signal fires and no move is in flight.
pub fn spawn_worker(ctx: Arc<WorkerContext>, handle: WorkerHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(worker_loop(ctx, handle))
}

async fn worker_loop(ctx: Arc<WorkerContext>, mut handle: WorkerHandle) {
    loop {
        if *handle.shutdown.borrow() {
            tracing::info!("worker shutting down, no move in flight");
            return;
        }

        if handle.ready_tx.send(handle.inbox_tx.clone()).await.is_err() {
            tracing::warn!("dispatcher's ready channel closed, worker exiting");
            return;
        }

        tokio::select! {
            token = handle.inbox_rx.recv() => {
                match token {
                    Some(token) => process_move(&ctx, token).await,
                    None => {
                        tracing::info!("worker inbox closed, exiting");
                        return;
                    }
                }
            }
            _ = handle.shutdown.changed() => {
                if *handle.shutdown.borrow() {
                    tracing::info!("worker shutting down while waiting for a token");
                    return;
                }
            }
        }
    }
}

/// Processes one `{moveId, rpcMethod}` token: lease, re-read, ping, resolve,
/// dispatch, call, apply, persist, then advance or complete the game.
/// Every failure path logs and leaves the move AWAITING rather than
/// propagating an error to the caller — there is no caller to propagate to,
/// only a future re-registration or Boot Reconciler pass that will retry.
async fn process_move(ctx: &WorkerContext, token: MoveToken) {
    let _lease = ctx.locks.acquire(token.move_id).await;

    let mv = match ctx.store.move_by_id(token.move_id).await {
        Ok(mv) => mv,
        Err(source) => {
            let error = WorkerError::Store { move_id: token.move_id, source };
            tracing::warn!(%error, "leaving move as-is");
            return;
        }
    };
    if mv.status != MoveStatus::Awaiting {
        return;
    }

    let chain = match ctx.store.move_chain(token.move_id).await {
        Ok(chain) => chain,
        Err(source) => {
            let error = WorkerError::Store { move_id: token.move_id, source };
            tracing::warn!(%error, "move stays AWAITING");
            return;
        }
    };

    if chain.bot.status != BotStatus::Online {
        tracing::debug!(bot_id = ?chain.bot.id, "bot not online, skipping move");
        return;
    }

    let prior_status = chain.bot.status;
    match ctx.rpc.ping(&chain.bot.endpoint).await {
        Err(source) => {
            let error = WorkerError::PingFailed { bot_id: chain.bot.id, source };
            tracing::info!(%error, "marking bot OFFLINE");
            if let Err(error) = ctx.store.set_bot_status(chain.bot.id, BotStatus::Offline).await {
                tracing::warn!(?error, "failed to record OFFLINE status");
            }
            return;
        }
        Ok(()) => {
            if let Err(error) = ctx.store.set_bot_status(chain.bot.id, BotStatus::Online).await {
                tracing::warn!(?error, "failed to record ONLINE status");
            }
            if prior_status != BotStatus::Online {
                resume_stalled_moves(ctx, chain.bot.id).await;
            }
        }
    }

    let (provider, bare_method) = match resolve_method(&ctx.providers, &token.rpc_method) {
        Ok(resolved) => resolved,
        Err(error) => {
            tracing::error!(?error, method = %token.rpc_method, "no provider for RPC method, move stays AWAITING");
            return;
        }
    };

    if let Err(error) = ctx.store.mark_game_in_progress(chain.game.id).await {
        tracing::warn!(?error, game_id = ?chain.game.id, "failed to mark game IN PROGRESS");
        return;
    }

    let handler = match provider.method_handler(bare_method) {
        Some(handler) => handler,
        None => {
            let error = crate::error::ConfigError::MissingMethodHandler {
                provider: provider.mnemonic().to_string(),
                method: bare_method.to_string(),
            };
            error_path(ctx, provider.as_ref(), &chain.game, &chain.bot, &error.to_string()).await;
            mark_bot_error(ctx, chain.bot.id).await;
            return;
        }
    };

    let params = match (handler.build_params)(&mv, &mv.game_state) {
        Ok(params) => params,
        Err(message) => {
            let error = WorkerError::RequestParams { move_id: mv.id, message };
            error_path(ctx, provider.as_ref(), &chain.game, &chain.bot, &error.to_string()).await;
            mark_bot_error(ctx, chain.bot.id).await;
            return;
        }
    };

    let response = match ctx.rpc.call(&chain.bot.endpoint, &token.rpc_method, params).await {
        Ok(response) => response,
        Err(source) => {
            let error = WorkerError::CallFailed { bot_id: chain.bot.id, source };
            error_path(ctx, provider.as_ref(), &chain.game, &chain.bot, &error.to_string()).await;
            mark_bot_error(ctx, chain.bot.id).await;
            return;
        }
    };

    let (game_result, next_method, new_state) =
        match (handler.process_response)(&mv, &mv.game_state, &response) {
            Ok(outcome) => outcome,
            Err(message) => {
                let error = WorkerError::ProcessResponse { move_id: mv.id, message };
                error_path(ctx, provider.as_ref(), &chain.game, &chain.bot, &error.to_string()).await;
                mark_bot_error(ctx, chain.bot.id).await;
                return;
            }
        };

    let winner = match game_result {
        GameResult::Win => true,
        GameResult::Draw | GameResult::Undecided => false,
    };

    // The predecessor must reach COMPLETE before its successor is created
    // and enqueued: otherwise two Moves of the same game could be AWAITING
    // at once, and a WIN could mark the Game COMPLETE before any Move
    // carries `winner=true`.
    if let Err(error) = ctx.store.complete_move(mv.id, new_state.clone(), winner).await {
        tracing::warn!(?error, move_id = ?mv.id, "failed to persist move outcome, not advancing game");
        return;
    }

    if matches!(game_result, GameResult::Undecided) {
        if let Err(error) = advance_game(ctx, provider.as_ref(), &mv.id, chain.game.id, &new_state, &next_method).await
        {
            tracing::warn!(?error, move_id = ?mv.id, "failed to enqueue successor move");
        }
    } else {
        complete_game(ctx, provider.as_ref(), &chain.game.id, &new_state).await;
    }
}

async fn advance_game(
    ctx: &WorkerContext,
    provider: &dyn crate::provider::GameProvider,
    current_move: &MoveId,
    game_id: crate::model::GameId,
    new_state: &Value,
    next_method: &str,
) -> Result<(), crate::error::StoreError> {
    let players = ctx.store.game_players(game_id).await?;
    let current = ctx.store.move_by_id(*current_move).await?;
    let next_player = match provider.next_player(&current, &players) {
        Ok(player) => player,
        Err(error) => {
            tracing::warn!(?error, move_id = ?current_move, "provider could not determine next player");
            return Ok(());
        }
    };
    let new_move = ctx.store.create_move(next_player, new_state.clone()).await?;
    let token = MoveToken { move_id: new_move.id, rpc_method: next_method.to_string() };
    if ctx.queue.enqueue(token).await.is_err() {
        tracing::warn!(move_id = ?new_move.id, "move queue closed, could not enqueue successor");
    }
    Ok(())
}

async fn complete_game(
    ctx: &WorkerContext,
    provider: &dyn crate::provider::GameProvider,
    game_id: &crate::model::GameId,
    final_state: &Value,
) {
    if let Err(error) = ctx.store.mark_game_complete(*game_id).await {
        tracing::warn!(?error, ?game_id, "failed to mark game COMPLETE");
        return;
    }
    let players = match ctx.store.game_players(*game_id).await {
        Ok(players) => players,
        Err(error) => {
            tracing::warn!(?error, ?game_id, "failed to load players for completion notify");
            return;
        }
    };
    let game = match ctx.store.game_by_id(*game_id).await {
        Ok(game) => game,
        Err(error) => {
            tracing::warn!(?error, ?game_id, "failed to reload game for completion notify");
            return;
        }
    };
    for player in players {
        let bot = match ctx.store.bot_by_id(player.bot).await {
            Ok(bot) => bot,
            Err(error) => {
                tracing::warn!(?error, bot_id = ?player.bot, "failed to load bot for completion notify");
                continue;
            }
        };
        let params = provider.complete_request_params(&game, &bot, final_state);
        let method = merknera_protocol::namespaced(provider.rpc_namespace(), merknera_protocol::COMPLETE_METHOD_SUFFIX);
        ctx.rpc.notify(&bot.endpoint, &method, params).await;
    }
}

/// Fire-and-forget `{namespace}.Error` notification. Called only once a
/// provider has already been resolved for this move.
async fn error_path(
    ctx: &WorkerContext,
    provider: &dyn crate::provider::GameProvider,
    game: &crate::model::Game,
    bot: &crate::model::Bot,
    message: &str,
) {
    let params = provider.error_request_params(game, message);
    let method = merknera_protocol::namespaced(provider.rpc_namespace(), merknera_protocol::ERROR_METHOD_SUFFIX);
    ctx.rpc.notify(&bot.endpoint, &method, params).await;
}

async fn mark_bot_error(ctx: &WorkerContext, bot_id: BotId) {
    if let Err(error) = ctx.store.set_bot_status(bot_id, BotStatus::Error).await {
        tracing::warn!(?error, ?bot_id, "failed to mark bot ERROR");
    }
}

async fn resume_stalled_moves(ctx: &WorkerContext, bot_id: BotId) {
    let moves = match ctx.store.awaiting_moves_for_bot(bot_id).await {
        Ok(moves) => moves,
        Err(error) => {
            tracing::warn!(?error, ?bot_id, "failed to list awaiting moves for resumed bot");
            return;
        }
    };
    for mv in moves {
        let chain = match ctx.store.move_chain(mv.id).await {
            Ok(chain) => chain,
            Err(error) => {
                tracing::warn!(?error, move_id = ?mv.id, "failed to resolve chain for resumed move");
                continue;
            }
        };
        let Ok(provider) = ctx.providers.by_mnemonic(&chain.game_type.mnemonic) else {
            tracing::error!(mnemonic = %chain.game_type.mnemonic, "no provider registered for resumed game type");
            continue;
        };
        let method = match provider.resume(&chain.game) {
            Ok(method) => method,
            Err(error) => {
                tracing::warn!(?error, move_id = ?mv.id, "provider could not resolve resume method");
                continue;
            }
        };
        let token = MoveToken { move_id: mv.id, rpc_method: method };
        if ctx.queue.enqueue(token).await.is_err() {
            tracing::warn!(move_id = ?mv.id, "move queue closed while resuming stalled moves");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::method as http_method;
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::error::ConfigError;
    use crate::model::{
        Bot, Game, GameId, GamePlayer, GamePlayerId, GameStatus, GameTypeId, Move, UserId,
    };
    use crate::provider::{BeginResult, GameProvider, MethodHandler, ProviderRegistry};
    use crate::store::memory::MemoryStore;
    use crate::store::{NewBot, Store};

    /// Matches a JSON-RPC request body by its `method` field, so a single
    /// mock endpoint can distinguish Ping from Call from Notify.
    struct MethodIs(&'static str);

    impl Match for MethodIs {
        fn matches(&self, request: &Request) -> bool {
            serde_json::from_slice::<Value>(&request.body)
                .ok()
                .and_then(|body| body.get("method").and_then(Value::as_str).map(|m| m == self.0))
                .unwrap_or(false)
        }
    }

    /// A minimal provider for exercising the worker pipeline: one namespace
    /// ("Test"), one method ("Move"), whose response carries an "outcome"
    /// of "win", "draw", "continue", or "illegal".
    struct TestProvider {
        handlers: HashMap<String, MethodHandler>,
    }

    impl TestProvider {
        fn new() -> Self {
            let mut handlers = HashMap::new();
            handlers.insert(
                "Move".to_string(),
                MethodHandler {
                    build_params: Box::new(|_mv, state| Ok(state.clone())),
                    process_response: Box::new(|_mv, state, response| {
                        let outcome = response.get("outcome").and_then(Value::as_str).unwrap_or("");
                        match outcome {
                            "illegal" => Err("illegal move".to_string()),
                            "win" => Ok((GameResult::Win, String::new(), state.clone())),
                            "draw" => Ok((GameResult::Draw, String::new(), state.clone())),
                            "continue" => {
                                Ok((GameResult::Undecided, "Test.Move".to_string(), state.clone()))
                            }
                            other => Err(format!("unknown outcome {other:?}")),
                        }
                    }),
                },
            );
            TestProvider { handlers }
        }
    }

    impl GameProvider for TestProvider {
        fn mnemonic(&self) -> &str {
            "TEST"
        }
        fn name(&self) -> &str {
            "Test Game"
        }
        fn rpc_namespace(&self) -> &str {
            "Test"
        }
        fn games_for_bot(&self, _new_bot: &Bot, _other_bots: &[Bot]) -> Vec<Vec<BotId>> {
            Vec::new()
        }
        fn begin(&self, game: &Game, _players: &[GamePlayer]) -> Result<BeginResult, ConfigError> {
            Err(ConfigError::EmptyGame(game.id))
        }
        fn resume(&self, _game: &Game) -> Result<String, ConfigError> {
            Ok("Test.Move".to_string())
        }
        fn next_player(
            &self,
            current_move: &Move,
            players: &[GamePlayer],
        ) -> Result<GamePlayerId, ConfigError> {
            players
                .iter()
                .find(|p| p.id != current_move.game_player)
                .map(|p| p.id)
                .ok_or(ConfigError::EmptyGame(GameId(0)))
        }
        fn method_handler(&self, bare_method: &str) -> Option<&MethodHandler> {
            self.handlers.get(bare_method)
        }
        fn complete_request_params(&self, game: &Game, bot: &Bot, final_state: &Value) -> Value {
            json!({"gameid": game.id.0, "bot": bot.id.0, "state": final_state})
        }
        fn error_request_params(&self, game: &Game, message: &str) -> Value {
            json!({"gameid": game.id.0, "message": message})
        }
    }

    struct Fixture {
        ctx: Arc<WorkerContext>,
        store: Arc<MemoryStore>,
        _dispatcher: Dispatcher,
    }

    async fn build_fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(TestProvider::new()));
        let (dispatcher, _handles) = Dispatcher::new(16, 1);
        let ctx = Arc::new(WorkerContext {
            store: store.clone() as Arc<dyn Store>,
            rpc: Arc::new(RpcTransport::new(Duration::from_secs(1), Duration::from_secs(1))),
            providers: Arc::new(registry),
            locks: MoveLockManager::new(),
            queue: dispatcher.sender(),
        });
        Fixture { ctx, store, _dispatcher: dispatcher }
    }

    async fn seed_bot(store: &MemoryStore, game_type: GameTypeId, owner: UserId, name: &str, endpoint: &str) -> Bot {
        store
            .insert_bot(NewBot {
                name: name.to_string(),
                version: "1.0.0".into(),
                game_type,
                owner,
                endpoint: endpoint.to_string(),
                description: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn s1_fresh_match_win_marks_move_and_game_complete_and_notifies_both_players() {
        let fixture = build_fixture().await;
        let server_a = MockServer::start().await;
        let server_b = MockServer::start().await;

        Mock::given(http_method("POST"))
            .and(MethodIs("Status.Ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server_a)
            .await;
        Mock::given(http_method("POST"))
            .and(MethodIs("Test.Move"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"outcome": "win"}
            })))
            .expect(1)
            .mount(&server_a)
            .await;
        Mock::given(http_method("POST"))
            .and(MethodIs("Test.Complete"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server_a)
            .await;
        Mock::given(http_method("POST"))
            .and(MethodIs("Test.Complete"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server_b)
            .await;

        let game_type = fixture.store.upsert_game_type("TEST", "Test").await.unwrap();
        let owner = fixture.store.seed_user_with_token("alice", "a@example.com", "tok").await;
        let bot_a = seed_bot(&fixture.store, game_type.id, owner, "bot-a", &format!("{}/rpc", server_a.uri())).await;
        let bot_b = seed_bot(&fixture.store, game_type.id, owner, "bot-b", &format!("{}/rpc", server_b.uri())).await;
        let (_game, players) = fixture.store.create_game(game_type.id, &[bot_a.id, bot_b.id]).await.unwrap();
        let mv = fixture.store.create_move(players[0].id, json!({"turn": 0})).await.unwrap();

        process_move(&fixture.ctx, MoveToken { move_id: mv.id, rpc_method: "Test.Move".to_string() }).await;

        let reloaded = fixture.store.move_by_id(mv.id).await.unwrap();
        assert_eq!(reloaded.status, MoveStatus::Complete);
        assert!(reloaded.winner);
        let game = fixture.store.game_by_id(players[0].game).await.unwrap();
        assert_eq!(game.status, GameStatus::Complete);

        // Mounted mocks carry `.expect(1)`; MockServer's Drop panics if any
        // expectation went unsatisfied, so dropping server_a/server_b at the
        // end of this test is itself the call-count assertion.
    }

    #[tokio::test]
    async fn s3_illegal_move_marks_bot_error_and_leaves_move_awaiting() {
        let fixture = build_fixture().await;
        let server = MockServer::start().await;

        Mock::given(http_method("POST"))
            .and(MethodIs("Status.Ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(MethodIs("Test.Move"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"outcome": "illegal"}
            })))
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(MethodIs("Test.Error"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let game_type = fixture.store.upsert_game_type("TEST", "Test").await.unwrap();
        let owner = fixture.store.seed_user_with_token("alice", "a@example.com", "tok").await;
        let bot = seed_bot(&fixture.store, game_type.id, owner, "bot-a", &format!("{}/rpc", server.uri())).await;
        let (_game, players) = fixture.store.create_game(game_type.id, &[bot.id]).await.unwrap();
        let mv = fixture.store.create_move(players[0].id, json!({"turn": 0})).await.unwrap();

        process_move(&fixture.ctx, MoveToken { move_id: mv.id, rpc_method: "Test.Move".to_string() }).await;

        let reloaded = fixture.store.move_by_id(mv.id).await.unwrap();
        assert_eq!(reloaded.status, MoveStatus::Awaiting);
        let bot = fixture.store.bot_by_id(bot.id).await.unwrap();
        assert_eq!(bot.status, BotStatus::Error);
    }

    #[tokio::test]
    async fn s5_duplicate_enqueue_makes_exactly_one_call_and_completes_once() {
        let fixture = build_fixture().await;
        let server = MockServer::start().await;

        Mock::given(http_method("POST"))
            .and(MethodIs("Status.Ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(MethodIs("Test.Move"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"outcome": "win"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(MethodIs("Test.Complete"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let game_type = fixture.store.upsert_game_type("TEST", "Test").await.unwrap();
        let owner = fixture.store.seed_user_with_token("alice", "a@example.com", "tok").await;
        let bot = seed_bot(&fixture.store, game_type.id, owner, "bot-a", &format!("{}/rpc", server.uri())).await;
        let (_game, players) = fixture.store.create_game(game_type.id, &[bot.id]).await.unwrap();
        let mv = fixture.store.create_move(players[0].id, json!({"turn": 0})).await.unwrap();

        let token = MoveToken { move_id: mv.id, rpc_method: "Test.Move".to_string() };
        tokio::join!(
            process_move(&fixture.ctx, token.clone()),
            process_move(&fixture.ctx, token.clone()),
        );

        let reloaded = fixture.store.move_by_id(mv.id).await.unwrap();
        assert_eq!(reloaded.status, MoveStatus::Complete);
        assert!(reloaded.winner);

        // The Test.Move mock carries `.expect(1)`; if the second, stale
        // invocation had re-called the bot, MockServer's Drop would panic.
    }
}
