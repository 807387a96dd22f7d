//! The Boot Reconciler: brings bot status up to date and re-enqueues every
//! AWAITING move once at startup, after the provider registry and
//! dispatcher are live but before the server accepts registration traffic.

use std::sync::Arc;

use crate::dispatch::{MoveQueueSender, MoveToken};
use crate::model::BotStatus;
use crate::provider::ProviderRegistry;
use crate::rpc::RpcTransport;
use crate::store::Store;

pub struct BootReconciler {
    store: Arc<dyn Store>,
    rpc: Arc<RpcTransport>,
    providers: Arc<ProviderRegistry>,
    queue: MoveQueueSender,
}

impl BootReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        rpc: Arc<RpcTransport>,
        providers: Arc<ProviderRegistry>,
        queue: MoveQueueSender,
    ) -> Self {
        BootReconciler { store, rpc, providers, queue }
    }

    /// Runs the full reconciliation pass once. Intended to be awaited to
    /// completion before the HTTP listener starts.
    pub async fn run(&self) -> Result<(), crate::error::StoreError> {
        self.ping_all_bots().await?;
        self.resume_awaiting_moves().await?;
        Ok(())
    }

    async fn ping_all_bots(&self) -> Result<(), crate::error::StoreError> {
        let bots = self.store.all_non_superseded_bots().await?;
        for bot in bots {
            match self.rpc.ping(&bot.endpoint).await {
                Ok(()) => {
                    if let Err(error) = self.store.set_bot_status(bot.id, BotStatus::Online).await {
                        tracing::warn!(?error, bot_id = ?bot.id, "failed to record ONLINE status at boot");
                    }
                }
                Err(error) => {
                    tracing::info!(?error, bot_id = ?bot.id, "bot unreachable at boot, marking OFFLINE");
                    if let Err(error) = self.store.set_bot_status(bot.id, BotStatus::Offline).await {
                        tracing::warn!(?error, bot_id = ?bot.id, "failed to record OFFLINE status at boot");
                    }
                }
            }
        }
        Ok(())
    }

    async fn resume_awaiting_moves(&self) -> Result<(), crate::error::StoreError> {
        let moves = self.store.awaiting_moves().await?;
        tracing::info!(count = moves.len(), "resuming awaiting moves at boot");
        for mv in moves {
            let chain = match self.store.move_chain(mv.id).await {
                Ok(chain) => chain,
                Err(error) => {
                    tracing::warn!(?error, move_id = ?mv.id, "failed to resolve chain while resuming at boot");
                    continue;
                }
            };
            let provider = match self.providers.by_mnemonic(&chain.game_type.mnemonic) {
                Ok(provider) => provider,
                Err(error) => {
                    tracing::error!(?error, mnemonic = %chain.game_type.mnemonic, "unregistered game type at boot");
                    continue;
                }
            };
            let method = match provider.resume(&chain.game) {
                Ok(method) => method,
                Err(error) => {
                    tracing::warn!(?error, move_id = ?mv.id, "provider could not resolve resume method at boot");
                    continue;
                }
            };
            if self.queue.enqueue(MoveToken { move_id: mv.id, rpc_method: method }).await.is_err() {
                tracing::warn!(move_id = ?mv.id, "move queue closed during boot reconciliation");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ConfigError;
    use crate::model::{Bot, BotId, Game, GamePlayer, GamePlayerId, Move};
    use crate::provider::{BeginResult, GameProvider, MethodHandler, ProviderRegistry};
    use crate::store::memory::MemoryStore;
    use crate::store::NewBot;

    struct TestProvider;

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
        fn begin(&self, _game: &Game, players: &[GamePlayer]) -> Result<BeginResult, ConfigError> {
            Ok(BeginResult {
                rpc_method: "Test.Move".to_string(),
                initial_player: players[0].id,
                initial_state: json!({}),
            })
        }
        fn resume(&self, _game: &Game) -> Result<String, ConfigError> {
            Ok("Test.Move".to_string())
        }
        fn next_player(
            &self,
            _current_move: &Move,
            players: &[GamePlayer],
        ) -> Result<GamePlayerId, ConfigError> {
            Ok(players[0].id)
        }
        fn method_handler(&self, _bare_method: &str) -> Option<&MethodHandler> {
            None
        }
        fn complete_request_params(&self, _game: &Game, _bot: &Bot, _final_state: &Value) -> Value {
            Value::Null
        }
        fn error_request_params(&self, _game: &Game, _message: &str) -> Value {
            Value::Null
        }
    }

    async fn seed_bot(store: &MemoryStore, name: &str, endpoint: &str) -> Bot {
        let game_type = match store.game_type_by_mnemonic("TEST").await.unwrap() {
            Some(existing) => existing,
            None => store.upsert_game_type("TEST", "Test Game").await.unwrap(),
        };
        let owner = store.seed_user_with_token(name, &format!("{name}@example.com"), &format!("tok-{name}")).await;
        store
            .insert_bot(NewBot {
                name: name.to_string(),
                version: "1".to_string(),
                game_type: game_type.id,
                owner,
                endpoint: endpoint.to_string(),
                description: None,
            })
            .await
            .unwrap()
    }

    fn reconciler(store: Arc<MemoryStore>, queue: MoveQueueSender) -> BootReconciler {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(TestProvider));
        let rpc = Arc::new(RpcTransport::new(Duration::from_secs(1), Duration::from_secs(1)));
        BootReconciler::new(store, rpc, Arc::new(registry), queue)
    }

    #[tokio::test]
    async fn reachable_bot_is_marked_online() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/rpc")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let store = Arc::new(MemoryStore::new());
        let bot = seed_bot(&store, "bot-a", &format!("{}/rpc", server.uri())).await;
        let (dispatcher, _handles) = crate::dispatch::Dispatcher::new(16, 1);

        reconciler(store.clone(), dispatcher.sender()).run().await.unwrap();

        assert_eq!(store.bot_by_id(bot.id).await.unwrap().status, crate::model::BotStatus::Online);
    }

    #[tokio::test]
    async fn unreachable_bot_is_marked_offline() {
        let store = Arc::new(MemoryStore::new());
        let bot = seed_bot(&store, "bot-a", "http://127.0.0.1:1/rpc").await;
        let (dispatcher, _handles) = crate::dispatch::Dispatcher::new(16, 1);

        reconciler(store.clone(), dispatcher.sender()).run().await.unwrap();

        assert_eq!(store.bot_by_id(bot.id).await.unwrap().status, crate::model::BotStatus::Offline);
    }

    #[tokio::test]
    async fn awaiting_move_is_re_enqueued_at_boot() {
        let store = Arc::new(MemoryStore::new());
        let bot = seed_bot(&store, "bot-a", "http://127.0.0.1:1/rpc").await;
        let (game, players) = store.create_game(bot.game_type, &[bot.id]).await.unwrap();
        let mv = store.create_move(players[0].id, json!({})).await.unwrap();

        let (dispatcher, mut handles) = crate::dispatch::Dispatcher::new(16, 1);
        let mut worker = handles.remove(0);
        worker.ready_tx.send(worker.inbox_tx.clone()).await.unwrap();

        reconciler(store.clone(), dispatcher.sender()).run().await.unwrap();

        let token = worker.inbox_rx.recv().await.unwrap();
        assert_eq!(token.move_id, mv.id);
        assert_eq!(token.rpc_method, "Test.Move");
        let _ = game;
    }
}
