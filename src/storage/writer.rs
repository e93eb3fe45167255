//! Append-only daily CSV files for polled samples
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;
use time::Date;

use crate::error::PersistenceError;
use crate::models::Sample;
use crate::rain::DailyRainTotal;
use crate::storage::cleanup::{cleanup_old_logs, CleanupReport};
use crate::utils::{format_date, format_hour_minute, format_rfc3339};

pub const FILE_PREFIX: &str = "weather_data_";
pub const FILE_SUFFIX: &str = ".csv";
pub const RAIN_TOTALS_FILE: &str = "daily_rainfall_totals.csv";

/// Written in place of a value whose sensor was unavailable
pub const UNAVAILABLE: &str = "NA";

pub const HEADER: [&str; 17] = [
    "timestamp",
    "temperature_c",
    "humidity_pct",
    "humidity_tier",
    "dew_point_c",
    "pressure_hpa",
    "wind_speed_ms",
    "wind_direction_deg",
    "wind_cardinal",
    "pm2_5",
    "aqi",
    "aqi_tier",
    "uv_index",
    "uv_risk",
    "rain_today_mm",
    "sunrise",
    "sunset",
];

/// The one open file, for a single calendar date
struct ActiveLog {
    date: Date,
    path: PathBuf,
    writer: csv::Writer<File>,
    opened_at: Instant,
}

/// Owns the day's log file and rotates it when the date changes
pub struct LogWriter {
    dir: PathBuf,
    active: Option<ActiveLog>,
}

impl LogWriter {
    /// Create a writer for `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        Ok(Self { dir, active: None })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self, date: Date) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", FILE_PREFIX, format_date(date), FILE_SUFFIX))
    }

    pub fn active_date(&self) -> Option<Date> {
        self.active.as_ref().map(|a| a.date)
    }

    /// Append one record to the file for the sample's local date
    ///
    /// Rotates first if the sample belongs to a different date than the
    /// open file. On failure the handle is dropped so the next append
    /// starts from a freshly opened file.
    ///
    /// # Arguments
    /// * `sample` - Sample to write; its timestamp picks the file
    ///
    /// # Returns
    /// `Ok(())` once the record is flushed, or the PersistenceError with
    /// the path that failed
    pub fn append(&mut self, sample: &Sample) -> Result<(), PersistenceError> {
        let date = sample.timestamp.date();
        let record = sample_record(sample);

        let active = self.open_for(date)?;
        let result = active
            .writer
            .write_record(&record)
            .map_err(|e| PersistenceError::csv(&active.path, e))
            .and_then(|_| {
                active
                    .writer
                    .flush()
                    .map_err(|e| PersistenceError::io(&active.path, e))
            });

        if result.is_err() {
            self.active = None;
        }
        result
    }

    /// Append a finished day's rainfall total to the totals file
    pub fn record_daily_rain(&mut self, total: DailyRainTotal) -> Result<(), PersistenceError> {
        let path = self.dir.join(RAIN_TOTALS_FILE);
        let mut writer = open_csv(&path, &["date", "rainfall_mm"])?;
        writer
            .write_record([format_date(total.date), format!("{:.1}", total.total)])
            .map_err(|e| PersistenceError::csv(&path, e))?;
        writer.flush().map_err(|e| PersistenceError::io(&path, e))
    }

    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        match self.active.as_mut() {
            Some(active) => active
                .writer
                .flush()
                .map_err(|e| PersistenceError::io(&active.path, e)),
            None => Ok(()),
        }
    }

    /// Delete daily files older than the retention window
    ///
    /// The open handle is released first if its own file is due for
    /// deletion.
    pub fn cleanup(&mut self, today: Date, retention_days: u32) -> CleanupReport {
        let expired = self
            .active
            .as_ref()
            .map(|a| (today - a.date).whole_days() > retention_days as i64)
            .unwrap_or(false);
        if expired {
            self.active = None;
        }
        cleanup_old_logs(&self.dir, today, retention_days)
    }

    fn open_for(&mut self, date: Date) -> Result<&mut ActiveLog, PersistenceError> {
        let active = match self.active.take() {
            Some(active) if active.date == date => active,
            previous => {
                if let Some(mut old) = previous {
                    info!(
                        "Rotating log {} after {}s -> {}",
                        old.path.display(),
                        old.opened_at.elapsed().as_secs(),
                        format_date(date)
                    );
                    // Best effort: the pending record belongs to the new file
                    if let Err(e) = old.writer.flush() {
                        debug!("Flush on rotation failed for {}: {}", old.path.display(), e);
                    }
                }

                let path = self.log_path(date);
                let writer = open_csv(&path, &HEADER)?;
                debug!("Opened log file {}", path.display());
                ActiveLog {
                    date,
                    path,
                    writer,
                    opened_at: Instant::now(),
                }
            }
        };

        Ok(self.active.insert(active))
    }
}

/// Open `path` for appending, writing `header` if the file is new or empty
fn open_csv(path: &Path, header: &[&str]) -> Result<csv::Writer<File>, PersistenceError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PersistenceError::io(path, e))?;
    let is_empty = file
        .metadata()
        .map_err(|e| PersistenceError::io(path, e))?
        .len()
        == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_empty {
        writer
            .write_record(header)
            .map_err(|e| PersistenceError::csv(path, e))?;
    }
    Ok(writer)
}

/// Serialize a Sample into one CSV record, in `HEADER` order
pub fn sample_record(sample: &Sample) -> Vec<String> {
    fn num(value: Option<f32>, decimals: usize) -> String {
        value
            .map(|v| format!("{:.*}", decimals, v))
            .unwrap_or_else(|| UNAVAILABLE.to_string())
    }
    fn label(value: Option<&'static str>) -> String {
        value.unwrap_or(UNAVAILABLE).to_string()
    }

    vec![
        format_rfc3339(&sample.timestamp),
        num(sample.temperature, 1),
        num(sample.humidity, 1),
        label(sample.humidity_tier.map(|t| t.label())),
        num(sample.dew_point, 1),
        num(sample.pressure, 1),
        num(sample.wind_speed, 1),
        num(sample.wind_direction.map(|w| w.degrees), 0),
        label(sample.wind_direction.map(|w| w.cardinal)),
        num(sample.pm2_5, 1),
        num(sample.air_quality.map(|a| a.aqi), 0),
        label(sample.air_quality.map(|a| a.tier.label())),
        num(sample.uv.map(|u| u.index), 2),
        label(sample.uv.map(|u| u.risk.label())),
        num(sample.rain_today, 1),
        format_hour_minute(sample.sun.sunrise),
        format_hour_minute(sample.sun.sunset),
    ]
}
