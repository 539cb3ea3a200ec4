//! `taskfabric` entry point.
//!
//! Grounded on the reference binary's shape — parse args, init tracing,
//! load config, build the app, serve with graceful shutdown — extended
//! with a `--role` switch so one binary can run the HTTP/WS surface, the
//! worker runtime, and the zombie reaper either together or split across
//! separate processes in production.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use mimalloc::MiMalloc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taskfabric::config::AppConfig;
use taskfabric::reaper::Reaper;
use taskfabric::server::create_app;
use taskfabric::worker::WorkerRuntime;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Which component(s) this process runs. Splittable for production
/// deployments where the API, the worker pool and the reaper scale
/// independently; `All` is the convenient single-process default.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Role {
    Api,
    Worker,
    Reaper,
    All,
}

#[derive(Parser, Debug)]
#[command(name = "taskfabric")]
#[command(about = "Distributed document-analysis job-orchestration fabric")]
#[command(version)]
struct Args {
    /// Host to bind to (overrides config).
    #[arg(long, env = "TASKFABRIC_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides config).
    #[arg(short, long, env = "TASKFABRIC_PORT")]
    port: Option<u16>,

    /// Log level.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Which component(s) to run in this process.
    #[arg(long, value_enum, default_value = "all")]
    role: Role,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level);

    tracing::info!("Starting taskfabric v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load()?;
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let (app, state) = create_app(config).await?;

    let mut tasks = tokio::task::JoinSet::new();

    if matches!(args.role, Role::Api | Role::All) {
        let host = state.config.server.host.clone();
        let port = state.config.server.port;
        tasks.spawn(async move {
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(addr = %addr, "listening");
            axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
            Ok::<(), anyhow::Error>(())
        });
    }

    if matches!(args.role, Role::Worker | Role::All) {
        let worker_state = state.clone();
        tasks.spawn(async move { WorkerRuntime::new(worker_state).run().await });
    }

    if matches!(args.role, Role::Reaper | Role::All) {
        let reaper = Reaper::new(state.task_store.clone(), Duration::from_secs(state.config.worker.reaper_interval_secs));
        tasks.spawn(async move {
            reaper.run().await;
            Ok(())
        });
    }

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "component exited with an error");
                return Err(e);
            }
            Err(e) => {
                tracing::error!(error = %e, "component task panicked");
                return Err(e.into());
            }
        }
    }

    tracing::info!("taskfabric shut down gracefully");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}
