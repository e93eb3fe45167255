//! Metric derivation: raw register words to human-meaningful values
//!
//! Every function here is total. Out-of-range input is clamped to a
//! documented fallback instead of failing, so one odd reading never blanks
//! a Sample.
use log::debug;

use crate::models::{AirQuality, AqiTier, HumidityTier, RegisterValue, UvReading, UvRisk, WindDirection};

/// PM2.5 breakpoint segment: (C_lo, C_hi, AQI_lo, AQI_hi, tier)
type Breakpoint = (f32, f32, f32, f32, AqiTier);

/// US EPA PM2.5 (24h) breakpoints
const PM25_BREAKPOINTS: [Breakpoint; 6] = [
    (0.0, 12.0, 0.0, 50.0, AqiTier::Good),
    (12.1, 35.4, 51.0, 100.0, AqiTier::Moderate),
    (35.5, 55.4, 101.0, 150.0, AqiTier::Unhealthy),
    (55.5, 150.4, 151.0, 200.0, AqiTier::Unhealthy),
    (150.5, 250.4, 201.0, 300.0, AqiTier::VeryUnhealthy),
    (250.5, 500.4, 301.0, 500.0, AqiTier::Hazardous),
];

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

// Magnus coefficients (Sonntag 1990)
const MAGNUS_A: f32 = 17.62;
const MAGNUS_B: f32 = 243.12;

/// Calculate the air quality index for a PM2.5 concentration
///
/// The concentration is truncated to 0.1 µg/m³ as the EPA tables expect,
/// then located in its breakpoint segment and linearly interpolated:
/// `((AQI_hi - AQI_lo) / (C_hi - C_lo)) * (C - C_lo) + AQI_lo`.
///
/// Negative or non-finite input clamps to 0; anything above the table
/// clamps to AQI 500.
pub fn aqi_from_pm25(pm2_5: f32) -> AirQuality {
    let concentration = if pm2_5.is_finite() && pm2_5 > 0.0 {
        (pm2_5 * 10.0).floor() / 10.0
    } else {
        if pm2_5 != 0.0 {
            debug!("PM2.5 {} out of range, clamped to 0", pm2_5);
        }
        0.0
    };

    for &(c_lo, c_hi, aqi_lo, aqi_hi, tier) in PM25_BREAKPOINTS.iter() {
        if concentration <= c_hi {
            // Values between two segments (e.g. 12.05 before truncation) land
            // on the lower bound of the next one
            let c = concentration.max(c_lo);
            let aqi = (aqi_hi - aqi_lo) / (c_hi - c_lo) * (c - c_lo) + aqi_lo;
            return AirQuality { aqi, tier };
        }
    }

    debug!("PM2.5 {} above breakpoint table, clamped to AQI 500", pm2_5);
    AirQuality {
        aqi: 500.0,
        tier: AqiTier::Hazardous,
    }
}

/// Map a UV index to its risk tier
pub fn uv_risk(uv_index: f32) -> UvReading {
    let index = if uv_index.is_finite() { uv_index.max(0.0) } else { 0.0 };
    let risk = if index <= 2.0 {
        UvRisk::Low
    } else if index <= 5.0 {
        UvRisk::Moderate
    } else if index <= 7.0 {
        UvRisk::High
    } else if index <= 10.0 {
        UvRisk::VeryHigh
    } else {
        UvRisk::Extreme
    };
    UvReading { index, risk }
}

pub fn humidity_tier(humidity: f32) -> HumidityTier {
    match humidity {
        h if h <= 30.0 => HumidityTier::Low,
        h if h <= 50.0 => HumidityTier::Normal,
        h if h <= 60.0 => HumidityTier::SlightlyHigh,
        h if h <= 70.0 => HumidityTier::High,
        _ => HumidityTier::VeryHigh,
    }
}

/// Convert wind degrees to a 16-point compass label
///
/// Each label covers 22.5°, centred on its bearing, so N spans
/// 348.75°–11.25°.
pub fn compass_cardinal(degrees: f32) -> &'static str {
    let degrees = if degrees.is_finite() {
        degrees.rem_euclid(360.0)
    } else {
        0.0
    };
    let index = ((degrees + 11.25) / 22.5) as usize % COMPASS_POINTS.len();
    COMPASS_POINTS[index]
}

/// Dew point in °C from temperature (°C) and relative humidity (%)
///
/// Magnus approximation. Humidity is clamped to [1, 100] so the logarithm
/// stays finite.
pub fn dew_point(temperature: f32, humidity: f32) -> f32 {
    let rh = if humidity.is_finite() {
        humidity.clamp(1.0, 100.0)
    } else {
        100.0
    };
    let gamma = (rh / 100.0).ln() + MAGNUS_A * temperature / (MAGNUS_B + temperature);
    MAGNUS_B * gamma / (MAGNUS_A - gamma)
}

// ---------------------------------------------------------------------------
// Register decoding
// ---------------------------------------------------------------------------

/// Temperature, humidity and pressure from the environment sensor
///
/// Registers 0..=2 hold tenths of °C (signed), % and hPa.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub pressure: Option<f32>,
}

pub fn decode_environment(value: &RegisterValue) -> Environment {
    Environment {
        temperature: value.word(0).map(|w| round_to(w as i16 as f32 / 10.0, 1)),
        humidity: value
            .word(1)
            .map(|w| round_to((w as f32 / 10.0).min(100.0), 1)),
        pressure: value.word(2).map(|w| round_to(w as f32 / 10.0, 1)),
    }
}

/// UV index, register in hundredths
pub fn decode_uv(value: &RegisterValue) -> Option<f32> {
    value.word(0).map(|w| round_to(w as f32 / 100.0, 2))
}

/// PM2.5 in µg/m³, register in tenths
pub fn decode_pm25(value: &RegisterValue) -> Option<f32> {
    value.word(0).map(|w| round_to(w as f32 / 10.0, 1))
}

/// Wind speed in m/s, register in tenths
pub fn decode_wind_speed(value: &RegisterValue) -> Option<f32> {
    value.word(0).map(|w| round_to(w as f32 / 10.0, 1))
}

/// Wind direction from the vane
///
/// The vane reports tenths of a degree in registers 0 and 2; the reading is
/// their mean rounded to a whole degree. Anything outside 0–360 is treated
/// as unavailable.
pub fn decode_wind_direction(value: &RegisterValue) -> Option<WindDirection> {
    let first = value.word(0)?;
    let third = value.word(2)?;
    let degrees = ((first as f32 + third as f32) / 2.0 / 10.0).round();
    if !(0.0..=360.0).contains(&degrees) {
        debug!(
            "Wind direction {}° from sensor {} out of range",
            degrees, value.address
        );
        return None;
    }
    Some(WindDirection {
        degrees,
        cardinal: compass_cardinal(degrees),
    })
}

/// Cumulative rain gauge reading in mm, register in tenths
pub fn decode_rain_counter(value: &RegisterValue) -> Option<f32> {
    value.word(0).map(|w| round_to(w as f32 / 10.0, 1))
}

fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn registers(words: &[u16]) -> RegisterValue {
        RegisterValue {
            address: 1,
            start: 0,
            words: words.to_vec(),
            read_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    // -----------------------------------------------------------------------
    // AQI
    // -----------------------------------------------------------------------

    #[test]
    fn aqi_segment_bounds() {
        assert_eq!(aqi_from_pm25(0.0).aqi, 0.0);
        assert!((aqi_from_pm25(12.0).aqi - 50.0).abs() < 0.01);
        assert!((aqi_from_pm25(12.1).aqi - 51.0).abs() < 0.01);
        assert!((aqi_from_pm25(35.4).aqi - 100.0).abs() < 0.01);
        assert!((aqi_from_pm25(500.4).aqi - 500.0).abs() < 0.01);
    }

    #[test]
    fn aqi_interpolates_within_segment() {
        // Midpoint of 0-12 is 6 -> AQI 25
        assert!((aqi_from_pm25(6.0).aqi - 25.0).abs() < 0.01);
        let moderate = aqi_from_pm25(23.75);
        assert_eq!(moderate.tier, AqiTier::Moderate);
        assert!(moderate.aqi > 51.0 && moderate.aqi < 100.0);
    }

    #[test]
    fn aqi_tiers_follow_table() {
        assert_eq!(aqi_from_pm25(5.0).tier, AqiTier::Good);
        assert_eq!(aqi_from_pm25(20.0).tier, AqiTier::Moderate);
        assert_eq!(aqi_from_pm25(40.0).tier, AqiTier::Unhealthy);
        assert_eq!(aqi_from_pm25(100.0).tier, AqiTier::Unhealthy);
        assert_eq!(aqi_from_pm25(200.0).tier, AqiTier::VeryUnhealthy);
        assert_eq!(aqi_from_pm25(300.0).tier, AqiTier::Hazardous);
    }

    #[test]
    fn aqi_clamps_invalid_input() {
        assert_eq!(aqi_from_pm25(-4.0).aqi, 0.0);
        assert_eq!(aqi_from_pm25(f32::NAN).aqi, 0.0);
        let over = aqi_from_pm25(900.0);
        assert_eq!(over.aqi, 500.0);
        assert_eq!(over.tier, AqiTier::Hazardous);
    }

    #[test]
    fn aqi_monotonic_in_concentration() {
        let mut previous = aqi_from_pm25(0.0).aqi;
        let mut c = 0.0f32;
        while c <= 510.0 {
            let aqi = aqi_from_pm25(c).aqi;
            assert!(aqi >= previous, "AQI decreased at {}: {} < {}", c, aqi, previous);
            previous = aqi;
            c += 0.05;
        }
    }

    // -----------------------------------------------------------------------
    // UV / humidity
    // -----------------------------------------------------------------------

    #[test]
    fn uv_risk_tiers() {
        assert_eq!(uv_risk(0.0).risk, UvRisk::Low);
        assert_eq!(uv_risk(2.0).risk, UvRisk::Low);
        assert_eq!(uv_risk(2.01).risk, UvRisk::Moderate);
        assert_eq!(uv_risk(6.5).risk, UvRisk::High);
        assert_eq!(uv_risk(10.0).risk, UvRisk::VeryHigh);
        assert_eq!(uv_risk(11.0).risk, UvRisk::Extreme);
        assert_eq!(uv_risk(-1.0).index, 0.0);
    }

    #[test]
    fn humidity_tiers() {
        assert_eq!(humidity_tier(25.0), HumidityTier::Low);
        assert_eq!(humidity_tier(45.0), HumidityTier::Normal);
        assert_eq!(humidity_tier(55.0), HumidityTier::SlightlyHigh);
        assert_eq!(humidity_tier(65.0), HumidityTier::High);
        assert_eq!(humidity_tier(90.0), HumidityTier::VeryHigh);
    }

    // -----------------------------------------------------------------------
    // Compass
    // -----------------------------------------------------------------------

    #[test]
    fn compass_principal_points() {
        assert_eq!(compass_cardinal(0.0), "N");
        assert_eq!(compass_cardinal(90.0), "E");
        assert_eq!(compass_cardinal(180.0), "S");
        assert_eq!(compass_cardinal(270.0), "W");
        assert_eq!(compass_cardinal(22.5), "NNE");
        assert_eq!(compass_cardinal(315.0), "NW");
    }

    #[test]
    fn compass_wraps_around_north() {
        for degrees in [348.76, 350.0, 359.99, 360.0, 0.0, 5.0, 11.24] {
            assert_eq!(compass_cardinal(degrees), "N", "{}°", degrees);
        }
        assert_eq!(compass_cardinal(348.7), "NNW");
        assert_eq!(compass_cardinal(11.26), "NNE");
        assert_eq!(compass_cardinal(-90.0), "W");
        assert_eq!(compass_cardinal(f32::INFINITY), "N");
    }

    // -----------------------------------------------------------------------
    // Dew point
    // -----------------------------------------------------------------------

    #[test]
    fn dew_point_matches_reference_values() {
        // Saturated air: dew point equals air temperature
        assert!((dew_point(20.0, 100.0) - 20.0).abs() < 0.01);
        // 25 °C at 60 % RH is about 16.7 °C
        assert!((dew_point(25.0, 60.0) - 16.7).abs() < 0.2);
        assert!(dew_point(25.0, 0.0).is_finite());
    }

    // -----------------------------------------------------------------------
    // Register decoding
    // -----------------------------------------------------------------------

    #[test]
    fn decodes_environment_registers() {
        let env = decode_environment(&registers(&[253, 612, 10132]));
        assert_eq!(env.temperature, Some(25.3));
        assert_eq!(env.humidity, Some(61.2));
        assert_eq!(env.pressure, Some(1013.2));
    }

    #[test]
    fn decodes_negative_temperature() {
        let env = decode_environment(&registers(&[(-45i16) as u16, 500, 10000]));
        assert_eq!(env.temperature, Some(-4.5));
    }

    #[test]
    fn short_environment_response_marks_missing_fields() {
        let env = decode_environment(&registers(&[200]));
        assert_eq!(env.temperature, Some(20.0));
        assert_eq!(env.humidity, None);
        assert_eq!(env.pressure, None);
    }

    #[test]
    fn wind_direction_averages_outer_registers() {
        let wind = decode_wind_direction(&registers(&[900, 0, 910])).unwrap();
        assert_eq!(wind.degrees, 91.0);
        assert_eq!(wind.cardinal, "E");
        assert!(decode_wind_direction(&registers(&[4000, 0, 4000])).is_none());
    }

    #[test]
    fn decodes_scaled_single_registers() {
        assert_eq!(decode_uv(&registers(&[735])), Some(7.35));
        assert_eq!(decode_pm25(&registers(&[184])), Some(18.4));
        assert_eq!(decode_wind_speed(&registers(&[42])), Some(4.2));
        assert_eq!(decode_rain_counter(&registers(&[17])), Some(1.7));
        assert_eq!(decode_uv(&registers(&[])), None);
    }
}
