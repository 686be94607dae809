//! The sampling run: scheduler, analyzer, inlet reader and logs tied together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};

use crate::analyzer::NoxAnalyzer;
use crate::config::RunConfig;
use crate::errors::{Result, TickError};
use crate::inlet::InletReader;
use crate::scheduler::{Clock, SampleTick, SamplingScheduler, Step};
use crate::sink::{self, RecordSink};
use crate::stats::{RunSummary, SessionStats, TickAccumulator};

/// Longest single sleep while waiting for a tick, so an interrupt is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Owns everything a run touches. Dropping it closes the serial channel, the log
/// files and any GPIO lines.
pub struct RunContext<'a> {
    config: &'a RunConfig,
    analyzer: NoxAnalyzer,
    inlet: Box<dyn InletReader>,
    sink: Box<dyn RecordSink>,
    scheduler: SamplingScheduler,
    stats: SessionStats,
    accumulator: TickAccumulator,
}

impl<'a> RunContext<'a> {
    pub fn new(
        config: &'a RunConfig,
        analyzer: NoxAnalyzer,
        inlet: Box<dyn InletReader>,
        sink: Box<dyn RecordSink>,
        scheduler: SamplingScheduler,
    ) -> Self {
        Self {
            config,
            analyzer,
            inlet,
            sink,
            scheduler,
            stats: SessionStats::default(),
            accumulator: TickAccumulator::default(),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Sample until `running` is cleared, then return the run summary.
    ///
    /// The flag is only looked at between ticks; a tick that has started always
    /// finishes its transactions and writes its rows.
    pub fn run(&mut self, clock: &dyn Clock, running: &AtomicBool) -> RunSummary {
        info!(
            "sampling every {:?}, instrument parameters every {} s",
            self.scheduler.sample_interval(),
            self.config.sampling.parameter_interval_secs
        );

        while running.load(Ordering::SeqCst) {
            let wake = match self.scheduler.plan(clock.now()) {
                Step::Rollover(rollover) => {
                    info!("new day {}, rotating log files", rollover.current);
                    if let Err(e) = self.sink.rollover(rollover.current) {
                        error!("log rotation failed, retrying on next write: {e}");
                    }
                    continue;
                }
                Step::Sleep { until } => until,
            };

            if !sleep_until(clock, wake, running) {
                break;
            }
            let now = clock.now();
            if self.scheduler.is_stale(wake, now) {
                warn!(
                    "woke at {} for the {} tick, skipping to the next boundary",
                    sink::format_timestamp(&now),
                    sink::format_timestamp(&wake)
                );
                continue;
            }
            let Some(tick) = self.scheduler.fire(wake) else {
                continue;
            };

            match self.tick(&tick) {
                Ok(()) => {}
                Err(TickError::Parameter(failure)) => {
                    warn!("instrument parameters not logged: {failure}");
                }
                Err(e) => error!("tick at {} failed: {e}", sink::format_timestamp(&tick.timestamp)),
            }
            debug!(
                "tick done: {} ok, {} failed",
                self.accumulator.successes, self.accumulator.failures
            );
            self.accumulator.reset();
        }

        let summary = self.stats.summary();
        info!(
            "stopped after {} reads, {} errors",
            summary.total_reads, summary.errors
        );
        summary
    }

    /// Take the readings for one tick and append the rows.
    pub fn tick(&mut self, tick: &SampleTick) -> std::result::Result<(), TickError> {
        let reading = match self.analyzer.read_concentrations() {
            Ok(reading) => reading,
            Err(e) => {
                self.record(false);
                return Err(TickError::Transport(e));
            }
        };
        self.record(!reading.is_failure());

        let inlet = self.inlet.read();
        let row = sink::concentration_row(&tick.timestamp, &reading, inlet);
        info!("{row}");
        self.sink
            .append_concentrations(&row)
            .map_err(TickError::Sink)?;

        if tick.is_param_sample {
            self.parameter_sample(&tick.timestamp)?;
        }
        Ok(())
    }

    fn parameter_sample(&mut self, at: &DateTime<Local>) -> std::result::Result<(), TickError> {
        let status = self
            .analyzer
            .read_instrument_status()
            .map_err(TickError::Transport)?;
        self.accumulator.record(status.is_ok());
        let status = status.map_err(TickError::Parameter)?;

        let row = sink::parameter_row(at, &status);
        info!("{row}");
        self.sink.append_parameters(&row).map_err(TickError::Sink)
    }

    fn record(&mut self, success: bool) {
        self.stats.record_read(success);
        self.accumulator.record(success);
    }
}

/// Sleep until `until` in short slices. Returns `false` if `running` was cleared.
fn sleep_until(clock: &dyn Clock, until: DateTime<Local>, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = match (until - clock.now()).to_std() {
            Ok(d) if !d.is_zero() => d,
            // already at or past the wake instant
            _ => return true,
        };
        clock.sleep(remaining.min(SLEEP_SLICE));
    }
}

/// Build a run context from configuration and already-opened collaborators.
pub fn start<'a>(
    config: &'a RunConfig,
    analyzer: NoxAnalyzer,
    inlet: Box<dyn InletReader>,
    sink: Box<dyn RecordSink>,
    now: DateTime<Local>,
) -> Result<RunContext<'a>> {
    let scheduler = SamplingScheduler::new(
        config.sampling.sample_interval_secs,
        config.sampling.parameter_interval_secs,
        now.date_naive(),
    )?;
    Ok(RunContext::new(config, analyzer, inlet, sink, scheduler))
}
