mod bluetooth;
mod config;
mod database;
mod error;
mod ingest;
mod models;
mod power_tier;
mod publish;
mod report;
mod utils;

use log::{error, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};

use bluetooth::scanner::run_scanner;
use config::BridgeConfig;
use database::PostgresStore;
use ingest::IngestionPipeline;
use publish::{ChangePublisher, MqttConnector};
use report::run_summary;
use utils::format_datetime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match BridgeConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Adaptive sensor bridge starting at {}",
        format_datetime(&OffsetDateTime::now_utc())
    );

    // The schema is created on whichever connection succeeds first
    let store = Arc::new(PostgresStore::new(config.database_url.clone()));
    if let Err(e) = store.init_schema().await {
        warn!("Database not reachable yet, readings are dropped until it is: {}", e);
    }

    // Stop all tasks on Ctrl+C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Program terminated by user. Exiting gracefully."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let (event_tx, event_rx) = mpsc::channel(config.event_queue_capacity);

    let pipeline = IngestionPipeline::new(store.clone(), config.sensor_name_pattern.clone());
    let ingestion = tokio::spawn(pipeline.run(event_rx, shutdown_rx.clone()));

    let publisher = ChangePublisher::new(
        store.clone(),
        MqttConnector::new(config.mqtt.clone()),
        config.mqtt.topic_prefix.clone(),
        config.publish_interval,
        config.reconnect_delay,
    );
    let publishing = tokio::spawn(publisher.run(shutdown_rx.clone()));

    let summary = tokio::spawn(run_summary(
        store,
        config.summary_interval,
        config.summary_hours,
        shutdown_rx.clone(),
    ));

    // The scanner owns the only sender; ingestion ends once it returns
    run_scanner(
        config.scan_duration,
        &config.sensor_name_pattern,
        event_tx,
        shutdown_rx,
    )
    .await;

    for (name, handle) in [
        ("ingestion", ingestion),
        ("publisher", publishing),
        ("summary", summary),
    ] {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }

    info!("Program completed successfully");
    Ok(())
}
