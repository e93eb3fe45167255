//! Console consumer of the latest published Sample
use log::info;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::Sample;
use crate::publisher::{LatestReading, ReadingHandle};
use crate::utils::{display_or_na, format_datetime, format_hour_minute};

/// One-line summary of whatever is currently published
pub fn summarize(reading: &LatestReading) -> String {
    match reading.sample() {
        Some(sample) => summarize_sample(sample),
        None => "Waiting for first reading".to_string(),
    }
}

fn summarize_sample(sample: &Sample) -> String {
    let humidity = match (sample.humidity, sample.humidity_tier) {
        (Some(h), Some(tier)) => format!("{:.1}% ({})", h, tier),
        (h, _) => format!("{}%", display_or_na(h, 1)),
    };
    let air = match sample.air_quality {
        Some(a) => format!("AQI {:.0} ({})", a.aqi, a.tier),
        None => "AQI N/A".to_string(),
    };
    let uv = match sample.uv {
        Some(u) => format!("UV {:.1} ({})", u.index, u.risk),
        None => "UV N/A".to_string(),
    };
    let wind_direction = sample
        .wind_direction
        .map(|w| format!("{} {:.0}°", w.cardinal, w.degrees))
        .unwrap_or_else(|| "N/A".to_string());

    format!(
        "{} | {}°C | {} | dew {}°C | {} hPa | wind {} m/s {} | {} | {} | rain {} mm | sun {}-{}",
        format_datetime(&sample.timestamp),
        display_or_na(sample.temperature, 1),
        humidity,
        display_or_na(sample.dew_point, 1),
        display_or_na(sample.pressure, 1),
        display_or_na(sample.wind_speed, 1),
        wind_direction,
        air,
        uv,
        display_or_na(sample.rain_today, 1),
        format_hour_minute(sample.sun.sunrise),
        format_hour_minute(sample.sun.sunset),
    )
}

/// Log a summary of the latest Sample every `every` until shutdown
pub fn spawn_display(
    handle: ReadingHandle,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => info!("{}", summarize(&handle.latest())),
            }
        }
    })
}
