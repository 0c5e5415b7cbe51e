use std::env;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use autodev::{
    clients::ChatworkClient,
    config::AppConfig,
    db,
    jobs::purge_finished_jobs,
    polling::PollingService,
};

const USAGE: &str = "Usage: maintenance <sync-once|purge-jobs>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("sync-once") => sync_once().await?,
        Some("purge-jobs") => purge_jobs().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_config() -> Result<AppConfig> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded configuration"
    );
    Ok(config)
}

async fn sync_once() -> Result<()> {
    let config = load_config()?;
    if config.chatwork_api_token.is_none() {
        eprintln!("CHATWORK_API_TOKEN is not set; nothing to sync.");
        std::process::exit(1);
    }

    let store = db::open_store(&config)?;
    let chat = ChatworkClient::new(
        config.chatwork_api_token.clone(),
        &config.chatwork_api_url,
        config.http_timeout(),
    )?;
    let polling = PollingService::new(store, Arc::new(chat), config.polling_interval_seconds);

    let report = polling.sync_now(None).await?;
    if report.sources.is_empty() {
        println!("No chat room sources found.");
        return Ok(());
    }

    for result in &report.sources {
        match &result.error {
            None => println!(
                "{} (room {}): {} new, {} total",
                result.source_id,
                result.room_id.as_deref().unwrap_or("-"),
                result.saved,
                result.total_messages
            ),
            Some(err) => eprintln!("{}: sync failed: {err}", result.source_id),
        }
    }
    println!(
        "Synced {} sources, {} new messages, {} failures.",
        report.sources.len(),
        report.saved(),
        report.failed()
    );
    Ok(())
}

async fn purge_jobs() -> Result<()> {
    let config = load_config()?;
    let store = db::open_store(&config)?;
    let removed = purge_finished_jobs(store.as_ref()).await?;
    println!("Removed {removed} finished jobs.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
