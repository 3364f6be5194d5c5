use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use scriptflow_core::config::ScriptflowConfig;
use scriptflow_scheduler::{ExecutionService, ExecutionSettings, SchedulerService, SystemClock};
use scriptflow_store::Store;
use tokio::sync::watch;
use tracing::{info, warn};

mod app;
mod http;
mod retention;

#[derive(Debug, Parser)]
#[command(name = "scriptflow-gateway", version, about = "Script runner and scheduler")]
struct Cli {
    /// Path to scriptflow.toml (else SCRIPTFLOW_CONFIG, else ~/.scriptflow/scriptflow.toml).
    #[arg(long, short)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "scriptflow_gateway=info,scriptflow_scheduler=info,scriptflow_runner=info,\
                 scriptflow_store=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // load config: --config > SCRIPTFLOW_CONFIG env > ~/.scriptflow/scriptflow.toml
    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("SCRIPTFLOW_CONFIG").ok());
    let config = ScriptflowConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ScriptflowConfig::default()
    });

    info!(path = %config.database.path, "opening SQLite database");
    let store = Arc::new(Store::open(&config.database.path)?);

    let settings = ExecutionSettings::from_config(&config.runner);
    info!(
        max_concurrent = settings.max_concurrent,
        timeout_secs = settings.timeout.as_secs(),
        work_root = %settings.work_root.display(),
        "execution settings"
    );
    let executor = ExecutionService::new(Arc::clone(&store), settings);
    let (scheduler, scheduler_handle) =
        SchedulerService::new(Arc::clone(&executor), Arc::new(SystemClock), &config.scheduler);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let retention_task = tokio::spawn(retention::run(
        Arc::clone(&store),
        config.retention.clone(),
        shutdown_rx,
    ));

    let state = Arc::new(app::AppState::new(executor, scheduler_handle));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    info!("Scriptflow gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop background loops; running attempts finish on their own tasks
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    let _ = retention_task.await;
    info!("Scriptflow gateway stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
