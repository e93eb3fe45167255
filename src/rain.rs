//! Daily rainfall accumulation
use log::{info, warn};
use time::{Date, OffsetDateTime, Time};

/// Rain total for a completed local day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyRainTotal {
    pub date: Date,
    pub total: f32,
}

/// Accumulation window and its running total
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyRainState {
    /// Local midnight that opened the window
    pub window_start: OffsetDateTime,
    pub total: f32,
}

/// Running rainfall total reset at local midnight
///
/// Fed per-interval deltas. Timestamps must already carry the station's
/// local offset; the day boundary is the calendar date in that offset.
#[derive(Debug, Default)]
pub struct RainAccumulator {
    state: Option<DailyRainState>,
}

impl RainAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rainfall delta observed at `timestamp`
    ///
    /// If `timestamp` falls on a later local date than the current window,
    /// the window is reset to that day's midnight first and the finished
    /// day's total is returned.
    ///
    /// Negative or non-finite deltas add nothing.
    pub fn add_delta(&mut self, amount: f32, timestamp: OffsetDateTime) -> Option<DailyRainTotal> {
        let closed = self.roll_to(timestamp);

        let amount = if amount.is_finite() && amount > 0.0 {
            amount
        } else {
            0.0
        };
        if let Some(state) = self.state.as_mut() {
            state.total += amount;
        }

        closed
    }

    /// Rain since local midnight of the current window
    pub fn current_total(&self) -> f32 {
        self.state().map(|s| s.total).unwrap_or(0.0)
    }

    pub fn state(&self) -> Option<DailyRainState> {
        self.state
    }

    fn roll_to(&mut self, timestamp: OffsetDateTime) -> Option<DailyRainTotal> {
        let date = timestamp.date();
        match self.state {
            Some(state) if state.window_start.date() == date => None,
            previous => {
                self.state = Some(DailyRainState {
                    window_start: timestamp.replace_time(Time::MIDNIGHT),
                    total: 0.0,
                });
                previous.map(|p| {
                    info!(
                        "Rain window closed for {}: {:.1} mm",
                        p.window_start.date(),
                        p.total
                    );
                    DailyRainTotal {
                        date: p.window_start.date(),
                        total: p.total,
                    }
                })
            }
        }
    }
}

/// Turns a tipping-bucket gauge's cumulative counter into per-poll deltas
///
/// The first reading only establishes a baseline. A reading lower than the
/// previous one means the gauge counter was reset (e.g. power loss): that
/// diff is suppressed once and the baseline moves to the new reading.
#[derive(Debug, Default)]
pub struct RainCounter {
    last: Option<f32>,
}

impl RainCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta(&mut self, reading: f32) -> f32 {
        let previous = self.last.replace(reading);
        match previous {
            None => 0.0,
            Some(previous) if reading < previous => {
                warn!(
                    "Rain gauge counter went backwards ({:.1} -> {:.1} mm), treating as reset",
                    previous, reading
                );
                0.0
            }
            Some(previous) => reading - previous,
        }
    }
}
