mod bus;
mod clock;
mod config;
mod display;
mod error;
mod metrics;
mod models;
mod poller;
mod publisher;
mod rain;
mod storage;
mod sun;
mod utils;

use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bus::ModbusRtuClient;
use clock::{Clock, SystemClock};
use config::StationConfig;
use poller::{PollSettings, SamplePoller};
use publisher::ReadingPublisher;
use storage::{spawn_cleanup_ticker, spawn_log_worker, LogWriter};
use sun::SunTable;
use utils::format_datetime;

async fn run(config: StationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.zone));
    info!(
        "Starting weather station at {} ({})",
        format_datetime(&clock.now()),
        config.zone
    );

    let sun = match &config.sun_data_file {
        Some(path) => match SunTable::load(path) {
            Ok(table) => {
                info!("Loaded sunrise/sunset for {} days", table.len());
                table
            }
            Err(e) => {
                warn!(
                    "Failed to load sun data from {}: {}. Using 06:00/18:00",
                    path.display(),
                    e
                );
                SunTable::default()
            }
        },
        None => SunTable::default(),
    };

    let writer = LogWriter::new(&config.log_dir)?;
    let (log_tx, log_rx) = mpsc::channel(config.queue_capacity);
    let log_worker = spawn_log_worker(writer, log_rx, config.retention_days);

    let shutdown = CancellationToken::new();
    let cleanup = spawn_cleanup_ticker(
        log_tx.clone(),
        Arc::clone(&clock),
        config.cleanup_interval,
        shutdown.clone(),
    );

    let (publisher, readings) = ReadingPublisher::new();
    let display = config
        .display_interval
        .map(|every| display::spawn_display(readings, every, shutdown.clone()));

    let poller = SamplePoller::new(
        ModbusRtuClient::new(config.serial.clone()),
        config.sensors,
        PollSettings::from(&config),
        Arc::clone(&clock),
        sun,
        publisher,
        log_tx,
    );
    let poller = tokio::spawn(poller.run(shutdown.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested. Finishing current cycle."),
        Err(e) => error!("Failed to listen for Ctrl+C: {}. Shutting down.", e),
    }
    shutdown.cancel();

    // Poller and ticker own the queue senders; once both are gone the
    // worker drains what is left and flushes
    match poller.await {
        Ok(exit) => info!(
            "Poller finished after {} cycles in state {:?}",
            exit.cycles, exit.state
        ),
        Err(e) => error!("Poller task failed: {}", e),
    }
    if let Err(e) = cleanup.await {
        error!("Cleanup task failed: {}", e);
    }
    if let Some(display) = display {
        if let Err(e) = display.await {
            error!("Display task failed: {}", e);
        }
    }
    match log_worker.await {
        Ok(stats) => info!(
            "Log worker finished: {} written, {} dropped, {} old files removed",
            stats.appended, stats.failed, stats.deleted
        ),
        Err(e) => error!("Log worker failed: {}", e),
    }

    info!("Weather station stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match StationConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    run(config).await
}
