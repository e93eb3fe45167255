//! Logging task: the only owner of the LogWriter
//!
//! Appends, daily rain totals and cleanup requests all arrive through one
//! bounded queue, so cleanup can never race an append on the same file.
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use time::Date;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::models::Sample;
use crate::rain::DailyRainTotal;
use crate::storage::writer::LogWriter;

#[derive(Debug)]
pub enum LogCommand {
    Append(Arc<Sample>),
    DailyRain(DailyRainTotal),
    Cleanup { today: Date },
}

/// Counters reported when the worker exits
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogWorkerStats {
    pub appended: usize,
    pub failed: usize,
    pub deleted: usize,
}

/// Run the LogWriter on a blocking thread until every sender is dropped
///
/// A failed append is logged and the record dropped; nothing is buffered
/// for retry. The writer is flushed before the worker returns.
///
/// # Arguments
/// * `writer` - Writer the worker takes ownership of
/// * `rx` - Receiving end of the logging queue
/// * `retention_days` - Window applied to `LogCommand::Cleanup`
///
/// # Returns
/// Handle resolving to the worker's counters once the queue closes
pub fn spawn_log_worker(
    mut writer: LogWriter,
    mut rx: mpsc::Receiver<LogCommand>,
    retention_days: u32,
) -> JoinHandle<LogWorkerStats> {
    tokio::task::spawn_blocking(move || {
        let mut stats = LogWorkerStats::default();
        info!("Log writer started. Output directory: {}", writer.dir().display());

        while let Some(command) = rx.blocking_recv() {
            match command {
                LogCommand::Append(sample) => match writer.append(&sample) {
                    Ok(()) => stats.appended += 1,
                    Err(e) => {
                        stats.failed += 1;
                        warn!("Dropping log record: {}", e);
                    }
                },
                LogCommand::DailyRain(total) => {
                    if let Err(e) = writer.record_daily_rain(total) {
                        warn!("Failed to store daily rainfall for {}: {}", total.date, e);
                    }
                }
                LogCommand::Cleanup { today } => {
                    let report = writer.cleanup(today, retention_days);
                    stats.deleted += report.deleted.len();
                }
            }
        }

        if let Err(e) = writer.flush() {
            error!("Final log flush failed: {}", e);
        }
        info!(
            "Log writer stopped: {} records written, {} dropped",
            stats.appended, stats.failed
        );
        stats
    })
}

/// Periodically queue a cleanup pass, starting immediately
///
/// # Arguments
/// * `tx` - Logging queue; cleanup runs on the worker, never beside it
/// * `clock` - Source of the local date passed to each pass
/// * `every` - Period between passes
/// * `shutdown` - Stops the ticker and drops its sender
pub fn spawn_cleanup_ticker(
    tx: mpsc::Sender<LogCommand>,
    clock: Arc<dyn Clock>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let today = clock.now().date();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                sent = tx.send(LogCommand::Cleanup { today }) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
