//! Clock-aligned sampling schedule.
//!
//! Main samples fire on wall-clock boundaries that are whole multiples of the
//! sample interval (counted from the Unix epoch), so a long-running process never
//! drifts and sibling loggers on the same line sample at the same instants.
//! A tick additionally carries an instrument-parameter sample when its
//! seconds-into-the-hour is a multiple of the parameter interval.
//!
//! The scheduler itself never sleeps. [`SamplingScheduler::plan`] says what to do
//! next and [`SamplingScheduler::fire`] turns a reached wake instant into a
//! [`SampleTick`]; the run loop does the waiting through a [`Clock`].

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike};
use log::debug;

use crate::errors::ConfigError;

/// Longest allowed parameter interval; it is measured within a single hour.
pub const MAX_PARAMETER_INTERVAL_SECS: u32 = 3600;

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock access, injected so the run loop can be driven by a fake clock.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// Ticks
// ============================================================================

/// One aligned sampling instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTick {
    pub timestamp: DateTime<Local>,
    pub is_main_sample: bool,
    pub is_param_sample: bool,
}

/// The local calendar day changed; logs must be rotated before the next sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRollover {
    pub previous: NaiveDate,
    pub current: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Rollover(DayRollover),
    /// Wait until `until`, then call [`SamplingScheduler::fire`] with it.
    Sleep { until: DateTime<Local> },
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone)]
pub struct SamplingScheduler {
    interval_ms: i64,
    parameter_interval: u32,
    day: NaiveDate,
    last_fired_ms: Option<i64>,
}

impl SamplingScheduler {
    /// `sample_interval_secs` may be fractional; it is resolved to whole milliseconds.
    pub fn new(
        sample_interval_secs: f64,
        parameter_interval_secs: u32,
        today: NaiveDate,
    ) -> Result<Self, ConfigError> {
        let interval_ms = (sample_interval_secs * 1000.0).round();
        if !sample_interval_secs.is_finite() || interval_ms < 1.0 {
            return Err(ConfigError::SampleInterval(sample_interval_secs));
        }
        if parameter_interval_secs == 0 || parameter_interval_secs > MAX_PARAMETER_INTERVAL_SECS
        {
            return Err(ConfigError::ParameterInterval(parameter_interval_secs));
        }
        Ok(Self {
            interval_ms: interval_ms as i64,
            parameter_interval: parameter_interval_secs,
            day: today,
            last_fired_ms: None,
        })
    }

    /// The day the current log files belong to.
    pub fn current_day(&self) -> NaiveDate {
        self.day
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms as u64)
    }

    /// Next aligned boundary at or after `now` that has not fired yet.
    pub fn next_wake(&self, now: DateTime<Local>) -> DateTime<Local> {
        let now_ms = now.timestamp_millis();
        let mut wake_ms = now_ms.div_euclid(self.interval_ms) * self.interval_ms;
        if wake_ms < now_ms {
            wake_ms += self.interval_ms;
        }
        if let Some(last) = self.last_fired_ms {
            if wake_ms <= last {
                wake_ms = last + self.interval_ms;
            }
        }
        Local
            .timestamp_millis_opt(wake_ms)
            .earliest()
            .unwrap_or(now)
    }

    /// Decide what happens next.
    ///
    /// A day change is judged by the day of the upcoming wake instant, so a sample
    /// taken at midnight already lands in the new day's files. It is reported exactly
    /// once; the following `plan` call computes a fresh wake instant.
    pub fn plan(&mut self, now: DateTime<Local>) -> Step {
        let wake = self.next_wake(now);
        let day = wake.date_naive();
        if day != self.day {
            let rollover = DayRollover {
                previous: self.day,
                current: day,
            };
            self.day = day;
            debug!("day rollover {} -> {}", rollover.previous, rollover.current);
            return Step::Rollover(rollover);
        }
        Step::Sleep { until: wake }
    }

    /// Claim the boundary at `wake`. Returns `None` if it already fired.
    pub fn fire(&mut self, wake: DateTime<Local>) -> Option<SampleTick> {
        let wake_ms = wake.timestamp_millis();
        if self.last_fired_ms.is_some_and(|last| wake_ms <= last) {
            return None;
        }
        self.last_fired_ms = Some(wake_ms);
        Some(SampleTick {
            timestamp: wake,
            is_main_sample: true,
            is_param_sample: self.is_param_sample(wake),
        })
    }

    /// Whether `now` is more than one interval past `wake`, e.g. after a suspend or a
    /// forward clock step. Such a wake is re-planned instead of fired.
    pub fn is_stale(&self, wake: DateTime<Local>, now: DateTime<Local>) -> bool {
        now.timestamp_millis() - wake.timestamp_millis() > self.interval_ms
    }

    /// Whether a tick at `at` also takes an instrument-parameter sample.
    pub fn is_param_sample(&self, at: DateTime<Local>) -> bool {
        let seconds_into_hour = at.minute() * 60 + at.second();
        at.timestamp_subsec_millis() == 0 && seconds_into_hour % self.parameter_interval == 0
    }
}
