mod config;
mod telegram;
mod wled;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::JsonConfigStore;
use crate::telegram::TelegramClient;
use crate::wled::WledTrigger;
use crate::worker::{Severity, StatusEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wledbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));

    info!("Loading configuration from: {}", config_path.display());
    let store = Arc::new(JsonConfigStore::new(config_path));
    let config = store
        .load_or_create()
        .context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  WLED device: {}", config.wled_ip);
    info!("  Action: {}", config.action);
    info!("  Chat ID: {}", config.chat_id);
    info!("  Polling rate: {}s", config.polling_rate);

    // Status events from the worker go straight to the log; a UI would
    // subscribe to this channel instead.
    let (status_tx, mut status_rx) = tokio::sync::mpsc::unbounded_channel::<StatusEvent>();
    tokio::spawn(async move {
        while let Some(event) = status_rx.recv().await {
            match event.severity {
                Severity::Info | Severity::Success => info!("[status] {}", event.text),
                Severity::Warning => warn!("[status] {}", event.text),
                Severity::Error => error!("[status] {}", event.text),
            }
        }
    });

    let source = Arc::new(TelegramClient::new(&config.bot_token));
    let trigger = Arc::new(WledTrigger::new(&config));

    info!("Starting poll worker...");
    let handle = worker::spawn(config, source, trigger, store, status_tx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");
    handle.stop().await;

    Ok(())
}
