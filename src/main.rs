mod api;
mod cache;
mod config;
mod db;
mod engine;
mod errors;
mod models;
mod store;
mod youtube;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;
use crate::engine::Engine;
use crate::store::Store;
use crate::youtube::{YoutubeClient, YoutubeFeed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vodsync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration from the environment")?;

    let pool = db::init_db(&config.database_path).await?;
    let youtube = Arc::new(YoutubeClient::new(config.youtube_api_key.clone()));
    let feeds = Arc::new(YoutubeFeed::new());
    let engine = Arc::new(Engine::new(
        Store::new(pool),
        youtube,
        feeds,
        config.clone(),
    ));

    if config.refresh_interval_seconds > 0 {
        tokio::spawn(autorefresh_loop(
            Arc::clone(&engine),
            config.refresh_interval_seconds,
        ));
    }

    let app = api::router(Arc::clone(&engine));

    let listener = tokio::net::TcpListener::bind(config.bind_address.as_str()).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Fires a refresh-all whenever `interval_seconds` have passed since the
/// last completed refresh. Foreground refreshes stamp the same clock, so a
/// manual refresh pushes the next background one out.
async fn autorefresh_loop(engine: Arc<Engine>, interval_seconds: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if engine.seconds_since_refresh() < interval_seconds {
            continue;
        }
        tracing::info!("Background refresh starting");
        match engine.refresh_all_channels(false, true, true).await {
            Ok(failures) if failures.is_empty() => {
                tracing::info!("Background refresh complete");
            }
            Ok(failures) => {
                for failure in &failures {
                    tracing::error!(
                        channel = %failure.channel_id,
                        error = %failure.error,
                        "Background refresh failure"
                    );
                }
            }
            Err(error) => tracing::error!(%error, "Background refresh failed"),
        }
    }
}
