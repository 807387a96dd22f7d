use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use merknera_core::boot::BootReconciler;
use merknera_core::dispatch::Dispatcher;
use merknera_core::error::RegistrationError;
use merknera_core::provider::{GameProvider, ProviderRegistry};
use merknera_core::registration::RegistrationCoordinator;
use merknera_core::rpc::RpcTransport;
use merknera_core::store::sqlite::SqliteStore;
use merknera_core::store::Store;
use merknera_core::worker::{spawn_worker, WorkerContext};
use merknera_protocol::{RegisterBotRequest, RegisterBotResponse};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(clap::Parser, Debug)]
struct Cli {
    #[clap(long, env = "MERKNERA_DB_PATH", default_value = "merknera.db")]
    db_path: PathBuf,
    #[clap(long, env = "MERKNERA_BIND_PORT", default_value_t = 8080)]
    bind_port: u16,
    #[clap(long, env = "MERKNERA_WORKER_POOL_SIZE", default_value_t = 4)]
    worker_pool_size: usize,
    #[clap(long, env = "MERKNERA_MOVE_QUEUE_CAPACITY", default_value_t = 100)]
    move_queue_capacity: usize,
    #[clap(long, env = "MERKNERA_PING_TIMEOUT_SECS", default_value_t = 30)]
    ping_timeout_secs: u64,
    #[clap(long, env = "MERKNERA_CALL_TIMEOUT_SECS", default_value_t = 60)]
    call_timeout_secs: u64,
}

struct AppState {
    registration: RegistrationCoordinator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true),
        )
        .init();

    let cli = Cli::parse();

    let db_url = format!("sqlite://{}?mode=rwc", cli.db_path.display());
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&db_url)
            .await
            .with_context(|| format!("failed to open database at {}", cli.db_path.display()))?,
    );

    let mut registry = ProviderRegistry::new();
    let tic_tac_toe: Arc<dyn GameProvider> = Arc::new(tic_tac_toe::TicTacToeProvider::new());
    let descriptor = tic_tac_toe.game_type_descriptor();
    store
        .upsert_game_type(&descriptor.mnemonic, &descriptor.display_name)
        .await
        .context("failed to upsert tic-tac-toe game type")?;
    registry.register(tic_tac_toe);
    let providers = Arc::new(registry);

    let rpc = Arc::new(RpcTransport::new(
        Duration::from_secs(cli.ping_timeout_secs),
        Duration::from_secs(cli.call_timeout_secs),
    ));

    let (dispatcher, handles) = Dispatcher::new(cli.move_queue_capacity, cli.worker_pool_size);
    let worker_ctx = Arc::new(WorkerContext {
        store: store.clone(),
        rpc: rpc.clone(),
        providers: providers.clone(),
        locks: merknera_core::move_lock::MoveLockManager::new(),
        queue: dispatcher.sender(),
    });
    for handle in handles {
        spawn_worker(worker_ctx.clone(), handle);
    }

    BootReconciler::new(store.clone(), rpc.clone(), providers.clone(), dispatcher.sender())
        .run()
        .await
        .context("boot reconciliation failed")?;

    let state = Arc::new(AppState {
        registration: RegistrationCoordinator::new(store.clone(), providers.clone(), dispatcher.sender()),
    });

    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/rpc/register", post(register_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.bind_port))
        .await
        .with_context(|| format!("failed to bind port {}", cli.bind_port))?;
    tracing::info!(port = cli.bind_port, "listening");

    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight moves");
        dispatcher.shutdown();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")?;

    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

/// The sole HTTP entry point a bot owner's tooling calls: bot registration,
/// returning the wire `RegisterBotResponse` on success or a textual error
/// with an appropriate status on failure.
async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterBotRequest>,
) -> impl IntoResponse {
    match state.registration.register(request).await {
        Ok(message) => (axum::http::StatusCode::OK, Json(RegisterBotResponse { message })).into_response(),
        Err(error) => {
            let status = match &error {
                RegistrationError::UnknownUser => axum::http::StatusCode::UNAUTHORIZED,
                RegistrationError::UnknownGame => axum::http::StatusCode::BAD_REQUEST,
                RegistrationError::NameTaken => axum::http::StatusCode::CONFLICT,
                RegistrationError::Store(_) | RegistrationError::Provider(_) => {
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            tracing::warn!(?error, "registration failed");
            (status, error.to_string()).into_response()
        }
    }
}
