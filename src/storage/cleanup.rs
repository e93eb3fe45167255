//! Retention policy for daily log files
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use time::Date;

use crate::storage::writer::{FILE_PREFIX, FILE_SUFFIX};
use crate::utils::parse_date;

/// Outcome of one cleanup pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleanupReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Date encoded in a daily log file name, if it is one of ours
pub fn file_date(file_name: &str) -> Option<Date> {
    file_name
        .strip_prefix(FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
        .and_then(parse_date)
}

/// Remove daily log files older than `retention_days`
///
/// A file is removed when `today - file_date` exceeds the retention window,
/// so with 7 days a file dated exactly one week ago is kept. Files whose
/// names do not carry a date are left alone. Failures to delete are logged
/// and skipped.
///
/// # Arguments
/// * `dir` - Directory holding the daily files
/// * `today` - Current local date
/// * `retention_days` - Maximum age in days a file is kept
pub fn cleanup_old_logs(dir: &Path, today: Date, retention_days: u32) -> CleanupReport {
    let mut report = CleanupReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list log directory {}: {}", dir.display(), e);
            return report;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(file_date) else {
            continue;
        };

        let age_days = (today - date).whole_days();
        if age_days <= retention_days as i64 {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted log file {} ({} days old)", path.display(), age_days);
                report.deleted.push(path);
            }
            Err(e) => {
                warn!("Failed to delete log file {}: {}", path.display(), e);
                report.failed.push(path);
            }
        }
    }

    debug!(
        "Log cleanup: {} deleted, {} failed",
        report.deleted.len(),
        report.failed.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::format_date;
    use tempfile::TempDir;
    use time::macros::date;
    use time::Duration;

    fn touch(dir: &Path, date: Date) -> PathBuf {
        let path = dir.join(format!("{}{}{}", FILE_PREFIX, format_date(date), FILE_SUFFIX));
        fs::write(&path, "timestamp\n").unwrap();
        path
    }

    #[test]
    fn parses_file_dates() {
        assert_eq!(
            file_date("weather_data_2024-06-01.csv"),
            Some(date!(2024 - 06 - 01))
        );
        assert_eq!(file_date("weather_data_latest.csv"), None);
        assert_eq!(file_date("daily_rainfall_totals.csv"), None);
    }

    #[test]
    fn deletes_only_files_beyond_retention() {
        let dir = TempDir::new().unwrap();
        let today = date!(2024 - 06 - 30);
        let ages = [0, 1, 6, 7, 8, 30];
        let paths: Vec<PathBuf> = ages
            .iter()
            .map(|&days| touch(dir.path(), today - Duration::days(days)))
            .collect();
        fs::write(dir.path().join("daily_rainfall_totals.csv"), "date\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let report = cleanup_old_logs(dir.path(), today, 7);

        let mut deleted = report.deleted.clone();
        deleted.sort();
        let mut expected = vec![paths[4].clone(), paths[5].clone()];
        expected.sort();
        assert_eq!(deleted, expected);
        assert!(report.failed.is_empty());

        for path in &paths[..4] {
            assert!(path.exists(), "{} should be kept", path.display());
        }
        assert!(dir.path().join("daily_rainfall_totals.csv").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn missing_directory_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let report = cleanup_old_logs(&dir.path().join("absent"), date!(2024 - 06 - 30), 7);
        assert_eq!(report, CleanupReport::default());
    }

    #[test]
    fn undeletable_entry_is_skipped() {
        let dir = TempDir::new().unwrap();
        let today = date!(2024 - 06 - 30);
        // A non-empty directory with a log-file name cannot be removed with remove_file
        let stuck = dir
            .path()
            .join(format!("{}2024-01-01{}", FILE_PREFIX, FILE_SUFFIX));
        fs::create_dir(&stuck).unwrap();
        let old = touch(dir.path(), today - Duration::days(20));

        let report = cleanup_old_logs(dir.path(), today, 7);
        assert_eq!(report.deleted, vec![old]);
        assert_eq!(report.failed, vec![stuck]);
    }
}
