//! portlane server

use anyhow::Context;
use clap::Parser;
use portlane_api::{AppState, routes};
use portlane_config::{RunnerKind, Settings};
use portlane_core::executor::RecipeRunner;
use portlane_executor::{MakeRunner, ScriptRunner};
use portlane_notify::Notifications;
use portlane_scheduler::{JobStore, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portlane-server")]
#[command(about = "Webhook-triggered ports build orchestrator", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "PORTLANE_CONFIG", default_value = "portlane.kdl")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, env = "PORTLANE_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let registry = Arc::new(settings.registry()?);
    info!(
        config = %cli.config.display(),
        queues = registry.queues().len(),
        logdir = %settings.logdir.display(),
        "Configuration loaded"
    );

    let runner: Arc<dyn RecipeRunner> = match settings.runner {
        RunnerKind::Make => Arc::new(MakeRunner::new(&settings.recipes)),
        RunnerKind::Script => Arc::new(ScriptRunner::new(&settings.recipes)),
    };
    let notifications = Notifications::from_settings(&settings.notification)?;
    if notifications.is_empty() {
        warn!("No notification channel configured");
    }

    let store = JobStore::new(&settings.logdir);
    let (pool, dispatcher) = WorkerPool::start(
        registry,
        runner,
        Arc::new(notifications),
        store,
        settings.server.base_url.clone(),
    );

    let state = AppState::new(dispatcher, settings.webhook.secret.clone());
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(settings.server.listen).await?;
    info!("Starting server on {}", settings.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
