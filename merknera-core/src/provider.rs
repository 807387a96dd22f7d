//! The Game Provider Registry: a process-local mapping from a game-type
//! mnemonic, and separately from an RPC namespace, to a *Game Provider* —
//! the pluggable object encoding one game type's rules.
//!
//! A provider's per-method handlers are not discovered by name-matching
//! reflection: each provider builds an explicit `method -> MethodHandler`
//! map, where a handler bundles a typed-inside/opaque-outside params
//! builder and response processor as boxed closures. The pipeline
//! (`Worker`) only ever sees `serde_json::Value` state, matching the
//! store's contract that `Move.game_state` is an opaque JSON blob.

use std::collections::HashMap;
use std::sync::Arc;

use merknera_protocol::GameResult;
use serde_json::Value;

use crate::error::ConfigError;
use crate::model::{Bot, BotId, Game, GamePlayer, GamePlayerId, GameType, Move};

/// Builds the typed request params for one RPC method call, given the
/// move being processed and its pre-call state.
pub type ParamsBuilder =
    Box<dyn Fn(&Move, &Value) -> Result<Value, String> + Send + Sync>;

/// Interprets a bot's reply to one RPC method call, producing the game
/// result, the method to call on the next player's turn, and the updated
/// state snapshot.
pub type ResponseProcessor =
    Box<dyn Fn(&Move, &Value, &Value) -> Result<(GameResult, String, Value), String> + Send + Sync>;

/// One RPC method's pair of handlers: not reflection-discovered, supplied
/// directly by the provider.
pub struct MethodHandler {
    pub build_params: ParamsBuilder,
    pub process_response: ResponseProcessor,
}

/// The result of [`GameProvider::begin`]: which method starts the game,
/// who moves first, and the initial state snapshot for that first move.
pub struct BeginResult {
    pub rpc_method: String,
    pub initial_player: GamePlayerId,
    pub initial_state: Value,
}

/// The per-game-type capability set the orchestration pipeline dispatches
/// through. One instance per game type, registered once at process start
/// and read-only thereafter.
pub trait GameProvider: Send + Sync {
    /// The store key for this game type, e.g. `"TICTACTOE"`.
    fn mnemonic(&self) -> &str;

    /// A human-readable display name.
    fn name(&self) -> &str;

    /// The RPC method prefix this provider's bots expose, e.g. `"TicTacToe"`.
    fn rpc_namespace(&self) -> &str;

    /// Describes the [`GameType`] row to insert if the store doesn't have
    /// one yet.
    fn game_type_descriptor(&self) -> GameTypeDescriptor {
        GameTypeDescriptor {
            mnemonic: self.mnemonic().to_string(),
            display_name: self.name().to_string(),
        }
    }

    /// Returns one ordered player-slot assignment per game that should be
    /// created against `new_bot`. Each returned `Vec<BotId>` is the play
    /// order (slot 1 first) for one game.
    fn games_for_bot(&self, new_bot: &Bot, other_bots: &[Bot]) -> Vec<Vec<BotId>>;

    /// Called once per freshly-created game to determine the first move's
    /// method, player, and initial state.
    fn begin(&self, game: &Game, players: &[GamePlayer]) -> Result<BeginResult, ConfigError>;

    /// Called by the Boot Reconciler to obtain the RPC method to resume a
    /// move that was AWAITING at shutdown.
    fn resume(&self, game: &Game) -> Result<String, ConfigError>;

    /// Returns the player who moves after `current_move`.
    fn next_player(
        &self,
        current_move: &Move,
        players: &[GamePlayer],
    ) -> Result<GamePlayerId, ConfigError>;

    /// Looks up the handler pair for one namespaced RPC method, e.g.
    /// `"NextMove"` (the namespace itself is stripped by the caller).
    fn method_handler(&self, bare_method: &str) -> Option<&MethodHandler>;

    /// Builds params for the end-of-game `{Namespace}.Complete` notification.
    fn complete_request_params(&self, game: &Game, bot: &Bot, final_state: &Value) -> Value;

    /// Builds params for the `{Namespace}.Error` notification.
    fn error_request_params(&self, game: &Game, message: &str) -> Value;
}

/// Describes the [`GameType`] row a provider expects to exist.
pub struct GameTypeDescriptor {
    pub mnemonic: String,
    pub display_name: String,
}

/// Process-local registry of game providers, with two lookup paths: by
/// mnemonic (used by the Registration Coordinator) and by RPC namespace
/// (used by the Worker).
#[derive(Default)]
pub struct ProviderRegistry {
    by_mnemonic: HashMap<String, Arc<dyn GameProvider>>,
    by_namespace: HashMap<String, Arc<dyn GameProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under both of its lookup keys. Registering two
    /// providers with the same mnemonic or namespace is a configuration
    /// error, fatal at boot, and panics rather than silently shadowing the
    /// earlier registration.
    pub fn register(&mut self, provider: Arc<dyn GameProvider>) {
        let mnemonic = provider.mnemonic().to_string();
        let namespace = provider.rpc_namespace().to_string();
        assert!(
            self.by_mnemonic.insert(mnemonic.clone(), provider.clone()).is_none(),
            "duplicate game provider registered for mnemonic {mnemonic:?}"
        );
        assert!(
            self.by_namespace.insert(namespace.clone(), provider).is_none(),
            "duplicate game provider registered for RPC namespace {namespace:?}"
        );
    }

    pub fn by_mnemonic(&self, mnemonic: &str) -> Result<&Arc<dyn GameProvider>, ConfigError> {
        self.by_mnemonic
            .get(mnemonic)
            .ok_or_else(|| ConfigError::UnknownMnemonic(mnemonic.to_string()))
    }

    pub fn by_namespace(&self, namespace: &str) -> Result<&Arc<dyn GameProvider>, ConfigError> {
        self.by_namespace
            .get(namespace)
            .ok_or_else(|| ConfigError::UnknownNamespace(namespace.to_string()))
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn GameProvider>> {
        self.by_mnemonic.values()
    }
}

/// Resolves `"TicTacToe.NextMove"` against a registry, returning the
/// provider and the bare method name the provider's handler map is keyed
/// by (the namespace is dispatch, not part of the handler key).
pub fn resolve_method<'a>(
    registry: &'a ProviderRegistry,
    rpc_method: &str,
) -> Result<(&'a Arc<dyn GameProvider>, &'a str), ConfigError> {
    let (namespace, bare_method) = merknera_protocol::split_namespace(rpc_method)
        .ok_or_else(|| ConfigError::UnknownNamespace(rpc_method.to_string()))?;
    let provider = registry.by_namespace(namespace)?;
    Ok((provider, bare_method))
}
