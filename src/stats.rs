use std::fmt;

/// Read counters for the lifetime of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    error_count: u64,
    total_reads: u64,
}

impl SessionStats {
    pub fn record_read(&mut self, success: bool) {
        self.total_reads += 1;
        if !success {
            self.error_count += 1;
        }
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn total_reads(&self) -> u64 {
        self.total_reads
    }

    /// `None` until at least one read has been recorded.
    pub fn error_ratio(&self) -> Option<f64> {
        (self.total_reads > 0).then(|| self.error_count as f64 / self.total_reads as f64)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            errors: self.error_count,
            total_reads: self.total_reads,
            error_ratio: self.error_ratio(),
        }
    }
}

/// Per-tick scratch counters, cleared at the end of every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickAccumulator {
    pub successes: u32,
    pub failures: u32,
}

impl TickAccumulator {
    pub fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What gets printed when the run stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub errors: u64,
    pub total_reads: u64,
    pub error_ratio: Option<f64>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-----------------------")?;
        writeln!(f, "Read errors: {:>12}", self.errors)?;
        writeln!(f, "Total reads: {:>12}", self.total_reads)?;
        match self.error_ratio {
            Some(ratio) => write!(f, "Error ratio: {:>12.3}", ratio),
            None => write!(f, "Error ratio: {:>12}", "n/a"),
        }
    }
}
