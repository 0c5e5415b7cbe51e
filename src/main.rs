use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::{net::TcpListener, signal, sync::watch};
use tracing_subscriber::EnvFilter;

use autodev::{
    config::AppConfig,
    db, default_handlers,
    routes::create_router,
    s3::build_storage,
    state::{AppState, Clients},
    Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        s3_bucket = config.s3_bucket.as_deref().unwrap_or("memory"),
        chatwork_configured = config.chatwork_api_token.is_some(),
        github_configured = config.github_token.is_some() && config.github_repo.is_some(),
        "loaded configuration"
    );

    let store = db::open_store(&config)?;
    let storage = build_storage(&config).await?;
    let clients = Clients::from_config(&config)?;
    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let worker_interval = Duration::from_millis(config.worker_poll_interval_ms);
    let autostart = config.polling_autostart;

    let state = AppState::new(config, store, storage, clients);

    let worker = Worker::new(Arc::new(state.clone()), default_handlers(), worker_interval);
    let (stop_worker, worker_shutdown) = watch::channel(false);
    let worker_task = tokio::spawn(async move { worker.run(worker_shutdown).await });

    if autostart {
        if let Err(err) = state.polling.start() {
            tracing::warn!(error = %err, "polling autostart skipped");
        }
    }

    let polling = state.polling.clone();
    let router = create_router(state);
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    polling.stop().await;
    let _ = stop_worker.send(true);
    if let Err(err) = worker_task.await {
        tracing::error!(error = %err, "worker task ended abnormally");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
