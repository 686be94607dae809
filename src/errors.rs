use std::io;
use thiserror::Error;

use crate::response::ReadFailure;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("log file error at {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("gpio error on line {line}: {source}")]
    Gpio {
        line: u32,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("serial port path is empty")]
    EmptyPort,
    #[error("unsupported data bits {0} (expected 5..=8)")]
    DataBits(u8),
    #[error("unsupported stop bits {0} (expected 1 or 2)")]
    StopBits(u8),
    #[error("instrument id {0} does not fit in two digits")]
    InstrumentId(u8),
    #[error("sample interval must be a positive number of seconds, got {0}")]
    SampleInterval(f64),
    #[error("parameter interval must be within 1..=3600 seconds, got {0}")]
    ParameterInterval(u32),
    #[error("log file stub `{0}` is empty")]
    EmptyStub(&'static str),
    #[error("expected {expected} inlet pins, got {found}")]
    InletPins { expected: usize, found: usize },
    #[error("pump pin {0} is also an inlet pin")]
    PumpPin(u32),
}

/// Errors that escape a single tick of the run loop.
///
/// Protocol-level failures are not in here: they travel as [`ReadFailure`]
/// values and end up as sentinel rows.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("transport fault: {0}")]
    Transport(#[source] DriverError),
    #[error("log sink fault: {0}")]
    Sink(#[source] DriverError),
    #[error("parameter sample failed: {0}")]
    Parameter(ReadFailure),
}

pub type Result<T> = std::result::Result<T, DriverError>;
