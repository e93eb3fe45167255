//! Sunrise/sunset reference table keyed by calendar day
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use time::macros::time;
use time::Date;

use crate::models::SunTimes;
use crate::utils::parse_hour_minute;

pub const DEFAULT_SUN_TIMES: SunTimes = SunTimes {
    sunrise: time!(06:00),
    sunset: time!(18:00),
};

#[derive(Debug, Deserialize)]
struct SunRow {
    /// MM-DD
    date: String,
    sunrise: String,
    sunset: String,
}

/// Read-only lookup of sunrise and sunset by month and day
#[derive(Debug, Default, Clone)]
pub struct SunTable {
    days: HashMap<(u8, u8), SunTimes>,
}

impl SunTable {
    /// Load a `date,sunrise,sunset` CSV (`MM-DD`, `HH:MM`, `HH:MM`)
    ///
    /// Rows that fail to parse are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self, csv::Error> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut days = HashMap::new();

        for (line, row) in reader.deserialize::<SunRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping sun data row {}: {}", line + 2, e);
                    continue;
                }
            };
            match parse_row(&row) {
                Some((key, times)) => {
                    days.insert(key, times);
                }
                None => warn!("Skipping invalid sun data row {}: {:?}", line + 2, row),
            }
        }

        debug!("Loaded sunrise/sunset for {} days from {}", days.len(), path.display());
        Ok(Self { days })
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    /// Sun times for `date`, or 06:00/18:00 when the table has no entry
    pub fn lookup(&self, date: Date) -> SunTimes {
        match self.days.get(&(date.month() as u8, date.day())) {
            Some(times) => *times,
            None => {
                debug!("No sun data for {}, using defaults", date);
                DEFAULT_SUN_TIMES
            }
        }
    }
}

fn parse_row(row: &SunRow) -> Option<((u8, u8), SunTimes)> {
    let (month, day) = row.date.trim().split_once('-')?;
    let month: u8 = month.parse().ok()?;
    let day: u8 = day.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let times = SunTimes {
        sunrise: parse_hour_minute(&row.sunrise)?,
        sunset: parse_hour_minute(&row.sunset)?,
    };
    Some(((month, day), times))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use time::macros::date;

    #[test]
    fn loads_and_looks_up_by_month_day() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,sunrise,sunset").unwrap();
        writeln!(file, "06-01,05:41,19:12").unwrap();
        writeln!(file, "06-02,bad,19:13").unwrap();
        writeln!(file, "12-31,07:18,17:47").unwrap();
        file.flush().unwrap();

        let table = SunTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.lookup(date!(2024 - 06 - 01)),
            SunTimes {
                sunrise: time!(05:41),
                sunset: time!(19:12)
            }
        );
        // Any year maps to the same row
        assert_eq!(table.lookup(date!(2031 - 12 - 31)).sunset, time!(17:47));
    }

    #[test]
    fn missing_day_uses_defaults() {
        let table = SunTable::default();
        assert_eq!(table.lookup(date!(2024 - 06 - 02)), DEFAULT_SUN_TIMES);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(SunTable::load(Path::new("/nonexistent/sun.csv")).is_err());
    }
}
