//! Sample polling loop
//!
//! One long-lived task owns the bus. Each cycle reads every fitted sensor,
//! derives metrics, publishes the Sample and hands it to the logging queue.
//! Sensor failures only blank the affected fields. When every sensor fails
//! for `failure_threshold` cycles in a row the poller backs off
//! exponentially until the bus answers again.
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::bus::BusClient;
use crate::clock::Clock;
use crate::config::{SensorMap, SensorSpec, StationConfig};
use crate::error::{PersistenceError, TransportError};
use crate::metrics;
use crate::models::{RegisterValue, Sample};
use crate::publisher::ReadingPublisher;
use crate::rain::{DailyRainTotal, RainAccumulator, RainCounter};
use crate::storage::LogCommand;
use crate::sun::SunTable;
use crate::utils::format_datetime;

/// Longest backoff exponent; keeps the multiplication far from overflow
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    BackingOff { delay: Duration },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub failure_threshold: u32,
    pub backoff_max: Duration,
    pub append_timeout: Duration,
}

impl From<&StationConfig> for PollSettings {
    fn from(config: &StationConfig) -> Self {
        PollSettings {
            interval: config.poll_interval,
            failure_threshold: config.failure_threshold,
            backoff_max: config.backoff_max,
            append_timeout: config.append_timeout,
        }
    }
}

type ReadResult = Option<Result<RegisterValue, TransportError>>;

/// Raw results of one pass over the bus; `None` for sensors not fitted
#[derive(Debug, Default)]
pub struct RawReadings {
    pub environment: ReadResult,
    pub uv: ReadResult,
    pub particulate: ReadResult,
    pub wind_speed: ReadResult,
    pub wind_direction: ReadResult,
    pub rain_gauge: ReadResult,
}

impl RawReadings {
    fn all(&self) -> [&ReadResult; 6] {
        [
            &self.environment,
            &self.uv,
            &self.particulate,
            &self.wind_speed,
            &self.wind_direction,
            &self.rain_gauge,
        ]
    }

    pub fn attempted(&self) -> usize {
        self.all().iter().filter(|r| r.is_some()).count()
    }

    pub fn failed_addresses(&self) -> Vec<u8> {
        self.all()
            .iter()
            .filter_map(|r| match r {
                Some(Err(e)) => Some(e.address()),
                _ => None,
            })
            .collect()
    }

    /// Every fitted sensor marked as failed with the same reason
    fn all_failed(sensors: &SensorMap, reason: &str) -> Self {
        let fail = |spec: Option<SensorSpec>| {
            spec.map(|s| {
                Err(TransportError::Io {
                    address: s.address,
                    source: std::io::Error::other(reason.to_string()),
                })
            })
        };
        RawReadings {
            environment: fail(sensors.environment),
            uv: fail(sensors.uv),
            particulate: fail(sensors.particulate),
            wind_speed: fail(sensors.wind_speed),
            wind_direction: fail(sensors.wind_direction),
            rain_gauge: fail(sensors.rain_gauge),
        }
    }
}

/// Query each fitted sensor once, in order, without retrying
pub fn read_all<B: BusClient + ?Sized>(bus: &mut B, sensors: &SensorMap) -> RawReadings {
    let mut read = |spec: Option<SensorSpec>, name: &str| {
        spec.map(|s| {
            let result = bus.read(s.address, s.registers);
            match &result {
                Ok(value) => debug!(
                    "{} sensor {} registers {}+{} at {}: {:?}",
                    name,
                    value.address,
                    value.start,
                    value.words.len(),
                    format_datetime(&value.read_at),
                    value.words
                ),
                Err(e) => warn!("{} sensor read failed: {}", name, e),
            }
            result
        })
    };

    RawReadings {
        environment: read(sensors.environment, "Environment"),
        uv: read(sensors.uv, "UV"),
        particulate: read(sensors.particulate, "Particulate"),
        wind_speed: read(sensors.wind_speed, "Wind speed"),
        wind_direction: read(sensors.wind_direction, "Wind direction"),
        rain_gauge: read(sensors.rain_gauge, "Rain gauge"),
    }
}

fn ok(result: &ReadResult) -> Option<&RegisterValue> {
    result.as_ref().and_then(|r| r.as_ref().ok())
}

/// How the polling loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerExit {
    pub cycles: u64,
    pub state: PollerState,
}

/// What a single cycle produced
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub sample: Arc<Sample>,
    pub attempted: usize,
    pub failed: usize,
}

impl CycleOutcome {
    /// Every fitted sensor failed; a partial success does not count
    pub fn is_full_failure(&self) -> bool {
        self.attempted > 0 && self.failed == self.attempted
    }
}

pub struct SamplePoller<B> {
    bus: Arc<Mutex<B>>,
    sensors: SensorMap,
    settings: PollSettings,
    clock: Arc<dyn Clock>,
    sun: SunTable,
    publisher: ReadingPublisher,
    log_tx: mpsc::Sender<LogCommand>,
    rain: RainAccumulator,
    rain_counter: RainCounter,
    consecutive_failures: u32,
    state: PollerState,
}

impl<B: BusClient + 'static> SamplePoller<B> {
    pub fn new(
        bus: B,
        sensors: SensorMap,
        settings: PollSettings,
        clock: Arc<dyn Clock>,
        sun: SunTable,
        publisher: ReadingPublisher,
        log_tx: mpsc::Sender<LogCommand>,
    ) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
            sensors,
            settings,
            clock,
            sun,
            publisher,
            log_tx,
            rain: RainAccumulator::new(),
            rain_counter: RainCounter::new(),
            consecutive_failures: 0,
            state: PollerState::Idle,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next cycle, given the current state
    pub fn next_delay(&self) -> Duration {
        match self.state() {
            PollerState::BackingOff { delay } => delay,
            _ => self.settings.interval,
        }
    }

    /// Poll until `shutdown` fires
    ///
    /// Shutdown is only observed between cycles: a cycle in progress always
    /// completes, including its hand-off to the logging queue. Dropping the
    /// poller on return releases its logging queue sender.
    ///
    /// # Arguments
    /// * `shutdown` - Token cancelled when the station should stop
    ///
    /// # Returns
    /// The number of cycles run and the final state, always `Stopped`
    pub async fn run(mut self, shutdown: CancellationToken) -> PollerExit {
        info!(
            "Starting sample poller: {} sensors, interval {:?}",
            self.sensors.configured(),
            self.settings.interval
        );
        let mut cycles = 0u64;

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            self.run_cycle().await;
            cycles += 1;

            let delay = self.next_delay();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state = PollerState::Stopped;
        info!("Sample poller stopped after {} cycles", cycles);
        PollerExit {
            cycles,
            state: self.state,
        }
    }

    /// Run one polling cycle: read, derive, publish, log
    ///
    /// Sensor failures blank their fields in the Sample and never abort the
    /// cycle. The Sample is published first, then handed to the logging
    /// queue within `append_timeout`.
    ///
    /// # Returns
    /// The published Sample with how many sensors were queried and failed
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.state = PollerState::Polling;

        // Serial I/O blocks; keep it off the async workers
        let bus = Arc::clone(&self.bus);
        let sensors = self.sensors;
        let readings = match tokio::task::spawn_blocking(move || {
            let mut bus = bus.lock().unwrap_or_else(|e| e.into_inner());
            read_all(&mut *bus, &sensors)
        })
        .await
        {
            Ok(readings) => readings,
            Err(e) => {
                error!("Bus read task failed: {}", e);
                RawReadings::all_failed(&sensors, "bus read task failed")
            }
        };

        let failed = readings.failed_addresses();
        if !failed.is_empty() {
            debug!("No data this cycle from sensor addresses {:?}", failed);
        }

        let timestamp = self.clock.now();
        let (sample, closed_day) = self.assemble(timestamp, &readings);
        let outcome = CycleOutcome {
            sample: Arc::new(sample),
            attempted: readings.attempted(),
            failed: failed.len(),
        };

        self.publisher.publish(Arc::clone(&outcome.sample));

        if let Some(total) = closed_day {
            self.forward(LogCommand::DailyRain(total)).await;
        }
        self.forward(LogCommand::Append(Arc::clone(&outcome.sample)))
            .await;

        self.record_outcome(&outcome);
        outcome
    }

    fn assemble(
        &mut self,
        timestamp: OffsetDateTime,
        readings: &RawReadings,
    ) -> (Sample, Option<DailyRainTotal>) {
        let mut sample = Sample::unavailable(timestamp, self.sun.lookup(timestamp.date()));

        if let Some(env) = ok(&readings.environment).map(metrics::decode_environment) {
            sample.temperature = env.temperature;
            sample.humidity = env.humidity;
            sample.pressure = env.pressure;
        }
        sample.humidity_tier = sample.humidity.map(metrics::humidity_tier);
        sample.dew_point = sample
            .temperature
            .zip(sample.humidity)
            .map(|(t, rh)| metrics::dew_point(t, rh));

        sample.uv = ok(&readings.uv)
            .and_then(metrics::decode_uv)
            .map(metrics::uv_risk);

        sample.pm2_5 = ok(&readings.particulate).and_then(metrics::decode_pm25);
        sample.air_quality = sample.pm2_5.map(metrics::aqi_from_pm25);

        sample.wind_speed = ok(&readings.wind_speed).and_then(metrics::decode_wind_speed);
        sample.wind_direction = ok(&readings.wind_direction).and_then(metrics::decode_wind_direction);

        let mut closed_day = None;
        if let Some(raw) = ok(&readings.rain_gauge).and_then(metrics::decode_rain_counter) {
            let delta = self.rain_counter.delta(raw);
            closed_day = self.rain.add_delta(delta, timestamp);
            sample.rain_today = Some(self.rain.current_total());
        }

        debug!(
            "Sample at {}: temp={:?} humidity={:?} pressure={:?} pm2.5={:?} uv={:?} wind={:?}/{:?} rain={:?}",
            format_datetime(&timestamp),
            sample.temperature,
            sample.humidity,
            sample.pressure,
            sample.pm2_5,
            sample.uv.map(|u| u.index),
            sample.wind_speed,
            sample.wind_direction.map(|w| w.cardinal),
            sample.rain_today
        );

        (sample, closed_day)
    }

    /// Hand a command to the logging task without stalling the cycle
    ///
    /// If the queue stays full past the append timeout the command is
    /// dropped with a warning.
    async fn forward(&self, command: LogCommand) {
        let timeout = self.settings.append_timeout;
        if let Err(e) = self.log_tx.send_timeout(command, timeout).await {
            let error = match e {
                SendTimeoutError::Timeout(_) => PersistenceError::QueueTimeout {
                    timeout_ms: timeout.as_millis(),
                },
                SendTimeoutError::Closed(_) => PersistenceError::QueueClosed,
            };
            warn!("{}", error);
        }
    }

    fn record_outcome(&mut self, outcome: &CycleOutcome) {
        if !outcome.is_full_failure() {
            if self.consecutive_failures > 0 {
                info!(
                    "Bus responding again after {} failed cycles",
                    self.consecutive_failures
                );
            }
            self.consecutive_failures = 0;
            self.state = PollerState::Idle;
            return;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        warn!(
            "All {} sensors failed ({} consecutive cycles)",
            outcome.attempted, self.consecutive_failures
        );

        if self.consecutive_failures < self.settings.failure_threshold {
            self.state = PollerState::Idle;
            return;
        }

        let delay = backoff_delay(&self.settings, self.consecutive_failures);
        warn!("Backing off for {:?} before next poll", delay);
        self.state = PollerState::BackingOff { delay };
    }
}

/// Delay after `failures` consecutive full-cycle failures
///
/// `interval × 2^(failures − threshold + 1)`, capped at `backoff_max`.
pub fn backoff_delay(settings: &PollSettings, failures: u32) -> Duration {
    let exponent = failures
        .saturating_add(1)
        .saturating_sub(settings.failure_threshold)
        .min(MAX_BACKOFF_EXPONENT);
    settings
        .interval
        .saturating_mul(1u32 << exponent)
        .min(settings.backoff_max)
}
