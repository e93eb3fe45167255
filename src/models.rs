use std::fmt;
use time::{OffsetDateTime, Time};

/// Block of holding registers to read from one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub start: u16,
    pub count: u16,
}

/// Raw register words returned by one bus read
///
/// Ephemeral: produced per poll and consumed immediately by metric
/// derivation.
#[derive(Debug, Clone)]
pub struct RegisterValue {
    pub address: u8,
    pub start: u16,
    pub words: Vec<u16>,
    pub read_at: OffsetDateTime,
}

impl RegisterValue {
    /// Word at `offset` from the start register, if the response held it
    pub fn word(&self, offset: usize) -> Option<u16> {
        self.words.get(offset).copied()
    }
}

/// Alert tier attached to an AQI value, fixed by the breakpoint table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AqiTier {
    Good,
    Moderate,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiTier {
    pub fn label(&self) -> &'static str {
        match self {
            AqiTier::Good => "GOOD",
            AqiTier::Moderate => "MODERATE",
            AqiTier::Unhealthy => "UNHEALTHY",
            AqiTier::VeryUnhealthy => "VERY UNHEALTHY",
            AqiTier::Hazardous => "HAZARDOUS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UvRisk {
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

impl UvRisk {
    pub fn label(&self) -> &'static str {
        match self {
            UvRisk::Low => "LOW",
            UvRisk::Moderate => "MODERATE",
            UvRisk::High => "HIGH",
            UvRisk::VeryHigh => "VERY HIGH",
            UvRisk::Extreme => "EXTREME",
        }
    }
}

/// Comfort band for relative humidity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HumidityTier {
    Low,
    Normal,
    SlightlyHigh,
    High,
    VeryHigh,
}

impl HumidityTier {
    pub fn label(&self) -> &'static str {
        match self {
            HumidityTier::Low => "LOW",
            HumidityTier::Normal => "NORMAL",
            HumidityTier::SlightlyHigh => "SLIGHTLY HIGH",
            HumidityTier::High => "HIGH",
            HumidityTier::VeryHigh => "VERY HIGH",
        }
    }
}

macro_rules! impl_display_label {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

impl_display_label!(AqiTier, UvRisk, HumidityTier);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirQuality {
    pub aqi: f32,
    pub tier: AqiTier,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvReading {
    pub index: f32,
    pub risk: UvRisk,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindDirection {
    pub degrees: f32,
    pub cardinal: &'static str,
}

/// Sunrise and sunset for the sample's date, attached verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: Time,
    pub sunset: Time,
}

/// Snapshot of one polling cycle
///
/// A `None` field means the sensor or bus failed during this cycle. Values
/// are never carried over from an earlier cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: OffsetDateTime,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub humidity_tier: Option<HumidityTier>,
    pub dew_point: Option<f32>,
    pub pressure: Option<f32>,
    pub wind_speed: Option<f32>,
    pub wind_direction: Option<WindDirection>,
    pub pm2_5: Option<f32>,
    pub air_quality: Option<AirQuality>,
    pub uv: Option<UvReading>,
    pub rain_today: Option<f32>,
    pub sun: SunTimes,
}

impl Sample {
    /// Sample with every sensor-derived field marked unavailable
    pub fn unavailable(timestamp: OffsetDateTime, sun: SunTimes) -> Self {
        Sample {
            timestamp,
            temperature: None,
            humidity: None,
            humidity_tier: None,
            dew_point: None,
            pressure: None,
            wind_speed: None,
            wind_direction: None,
            pm2_5: None,
            air_quality: None,
            uv: None,
            rain_today: None,
            sun,
        }
    }
}
