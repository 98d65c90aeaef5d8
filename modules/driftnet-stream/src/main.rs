use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use driftnet_common::Config;
use driftnet_store::{migrate, PgStore};
use driftnet_stream::trends::TrendsWatcher;
use driftnet_stream::{StreamController, StreamSettings};
use twitter_client::TwitterClient;

/// Stream loader daemon: resumes active searches, supervises upstream
/// connections, and drains the ingestion queue until interrupted.
#[derive(Parser)]
#[command(name = "driftnet-stream")]
struct Args {
    /// Override the number of persister workers.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("driftnet=info".parse()?))
        .init();

    let args = Args::parse();

    info!("Driftnet stream loader starting...");

    let config = Config::from_env();

    let store = PgStore::connect(&config.database_url).await?;
    migrate(store.pool()).await?;
    let store = Arc::new(store);

    let client = Arc::new(TwitterClient::new(config.twitter_bearer_token.clone()));
    let verified = client.verify_credentials().await?;
    info!(screen_name = %verified.screen_name, "Upstream credentials verified");

    let settings = StreamSettings::builder()
        .persister_workers(args.workers.unwrap_or(config.persister_workers))
        .trends_refresh_interval(Duration::from_secs(config.trends_refresh_secs))
        .build();
    let trends_interval = settings.trends_refresh_interval;

    let controller = StreamController::new(
        client.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        settings,
    );

    let resumed = controller.resume().await?;
    info!(resumed, "Stream loader ready");

    let trends = TrendsWatcher::spawn(store.clone(), client, trends_interval);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    trends.stop().await;
    controller.stop().await?;

    Ok(())
}
