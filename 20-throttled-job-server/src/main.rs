use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use throttled_job_server::{
    cli::Config,
    pool::WorkerPool,
    ratelimit::TokenBucket,
    repo::InMemoryRepository,
    server::{self, AppState},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::parse();
    info!(?config, "starting throttled job server");

    let repo = Arc::new(InMemoryRepository::new());
    let pool = Arc::new(WorkerPool::new(config.workers, config.queue_size));
    let bucket = Arc::new(TokenBucket::new(config.burst, config.fill_rate));
    pool.start();

    let state = AppState::new(repo, Arc::clone(&pool), bucket, config.job_delay());
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    let served = server::serve(listener, state, shutdown_signal()).await;

    if tokio::time::timeout(config.shutdown_timeout(), pool.stop())
        .await
        .is_err()
    {
        warn!(
            timeout = ?config.shutdown_timeout(),
            "worker pool did not stop before the shutdown deadline"
        );
    }

    served.context("server stopped with error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
