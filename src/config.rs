use log::info;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use time::macros::format_description;
use time::UtcOffset;

use crate::bus::SerialSettings;
use crate::clock::LocalZone;
use crate::error::ConfigError;
use crate::models::RegisterSpec;

/// Where one physical sensor lives on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSpec {
    pub address: u8,
    pub registers: RegisterSpec,
}

/// Register map of the station; `None` means the sensor is not fitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorMap {
    pub environment: Option<SensorSpec>,
    pub uv: Option<SensorSpec>,
    pub particulate: Option<SensorSpec>,
    pub wind_speed: Option<SensorSpec>,
    pub wind_direction: Option<SensorSpec>,
    pub rain_gauge: Option<SensorSpec>,
}

impl SensorMap {
    /// Number of fitted sensors
    pub fn configured(&self) -> usize {
        [
            self.environment,
            self.uv,
            self.particulate,
            self.wind_speed,
            self.wind_direction,
            self.rain_gauge,
        ]
        .iter()
        .filter(|s| s.is_some())
        .count()
    }
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub serial: SerialSettings,
    pub sensors: SensorMap,
    pub poll_interval: Duration,
    pub failure_threshold: u32,
    pub backoff_max: Duration,
    pub log_dir: PathBuf,
    pub retention_days: u32,
    pub cleanup_interval: Duration,
    pub append_timeout: Duration,
    pub queue_capacity: usize,
    pub sun_data_file: Option<PathBuf>,
    pub zone: LocalZone,
    pub display_interval: Option<Duration>,
}

/// (name, default slave address, registers read per poll)
const SENSORS: [(&str, u8, u16); 6] = [
    ("ENVIRONMENT", 1, 3),
    ("UV", 2, 1),
    ("PARTICULATE", 3, 1),
    ("WIND_SPEED", 4, 1),
    ("WIND_DIRECTION", 5, 3),
    ("RAIN", 6, 1),
];

impl StationConfig {
    /// Load configuration from the environment (and `.env` if present)
    pub fn new() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let port = vars
            .get("SERIAL_PORT")
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::Missing("SERIAL_PORT"))?;

        let serial = SerialSettings {
            port,
            baud_rate: vars.parse("SERIAL_BAUD", 9600)?,
            parity: vars.parse_with("SERIAL_PARITY", serialport::Parity::None, parse_parity)?,
            stop_bits: vars.parse_with("SERIAL_STOP_BITS", serialport::StopBits::One, parse_stop_bits)?,
            timeout: Duration::from_millis(vars.positive("BUS_TIMEOUT_MS", 2000)?),
        };

        let mut specs = [None; 6];
        for (slot, (name, default_address, count)) in specs.iter_mut().zip(SENSORS) {
            *slot = vars.sensor(name, default_address, count)?;
        }
        let [environment, uv, particulate, wind_speed, wind_direction, rain_gauge] = specs;
        let sensors = SensorMap {
            environment,
            uv,
            particulate,
            wind_speed,
            wind_direction,
            rain_gauge,
        };

        // A fixed offset overrides the zone name
        let zone = match vars.get("STATION_UTC_OFFSET") {
            Some(raw) => LocalZone::Fixed(parse_offset(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "STATION_UTC_OFFSET".into(),
                value: raw.clone(),
                reason: "expected ±HH:MM".into(),
            })?),
            None => vars.parse_with("STATION_TZ", LocalZone::Host, |raw| {
                raw.parse::<chrono_tz::Tz>()
                    .map(LocalZone::Named)
                    .map_err(|e| e.to_string())
            })?,
        };

        let display_secs: u64 = vars.parse("DISPLAY_INTERVAL_SECS", 10)?;

        let config = StationConfig {
            serial,
            sensors,
            poll_interval: Duration::from_secs(vars.positive("POLL_INTERVAL_SECS", 5)?),
            failure_threshold: vars.positive("FAILURE_THRESHOLD", 5)?,
            backoff_max: Duration::from_secs(vars.positive("BACKOFF_MAX_SECS", 300)?),
            log_dir: vars
                .get("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("csv_data")),
            retention_days: vars.parse("LOG_RETENTION_DAYS", 7)?,
            cleanup_interval: Duration::from_secs(vars.positive("CLEANUP_INTERVAL_SECS", 86_400)?),
            append_timeout: Duration::from_millis(vars.positive("LOG_APPEND_TIMEOUT_MS", 500)?),
            queue_capacity: vars.positive("LOG_QUEUE_CAPACITY", 64)?,
            sun_data_file: vars.get("SUN_DATA_FILE").map(PathBuf::from),
            zone,
            display_interval: (display_secs > 0).then(|| Duration::from_secs(display_secs)),
        };

        info!(
            "Configured {} sensors on {} at {} baud, polling every {}s",
            config.sensors.configured(),
            config.serial.port,
            config.serial.baud_rate,
            config.poll_interval.as_secs()
        );
        Ok(config)
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn parse_with<T>(
        &self,
        key: &str,
        default: T,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse(&raw).map_err(|reason| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
                reason,
            }),
        }
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse_with(key, default, |raw| raw.parse::<T>().map_err(|e| e.to_string()))
    }

    /// Like `parse`, rejecting zero
    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(key, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(value)
    }

    /// `SENSOR_<NAME>_ADDRESS` (or `off`) and `SENSOR_<NAME>_REGISTER`
    fn sensor(&self, name: &str, default_address: u8, count: u16) -> Result<Option<SensorSpec>, ConfigError> {
        let address_key = format!("SENSOR_{}_ADDRESS", name);
        if self
            .get(&address_key)
            .is_some_and(|v| v.eq_ignore_ascii_case("off"))
        {
            return Ok(None);
        }

        let address: u8 = self.parse(&address_key, default_address)?;
        if !(1..=247).contains(&address) {
            return Err(ConfigError::Invalid {
                key: address_key,
                value: address.to_string(),
                reason: "modbus slave address must be 1-247".into(),
            });
        }
        let start: u16 = self.parse(&format!("SENSOR_{}_REGISTER", name), 0)?;

        Ok(Some(SensorSpec {
            address,
            registers: RegisterSpec { start, count },
        }))
    }
}

fn parse_parity(raw: &str) -> Result<serialport::Parity, String> {
    match raw.to_ascii_uppercase().as_str() {
        "N" | "NONE" => Ok(serialport::Parity::None),
        "E" | "EVEN" => Ok(serialport::Parity::Even),
        "O" | "ODD" => Ok(serialport::Parity::Odd),
        _ => Err("expected N, E or O".into()),
    }
}

fn parse_stop_bits(raw: &str) -> Result<serialport::StopBits, String> {
    match raw {
        "1" => Ok(serialport::StopBits::One),
        "2" => Ok(serialport::StopBits::Two),
        _ => Err("expected 1 or 2".into()),
    }
}

fn parse_offset(raw: &str) -> Option<UtcOffset> {
    UtcOffset::parse(
        raw,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .ok()
}
