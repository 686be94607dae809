//! Serial driver and sampling logger for CLD 700 type NOx analyzers.
//!
//! The analyzer is polled over an RS-232 line with short STX/ETX framed commands
//! protected by an XOR block check character. Every aligned tick the logger reads the
//! NO, NO2 and NOx concentrations and, on a slower cadence inside the hour, the
//! instrument's health parameters (status bytes, pressures, temperatures, flow and
//! range). Readings go to two day-stamped CSV files.
//!
//! # Timing
//!
//! Ticks are phase-locked to the wall clock: with a 10 s interval samples are taken
//! at :00, :10, :20 and so on, regardless of how long the previous tick took. Several
//! loggers sampling the same air therefore line up without talking to each other.

pub mod analyzer;
pub mod config;
mod errors;
pub mod frame;
pub mod inlet;
pub mod logging;
pub mod response;
pub mod run;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod transport;

pub use analyzer::{NoxAnalyzer, ProbeReport};
pub use config::RunConfig;
pub use errors::*;
pub use frame::{compute_bcc, encode, Command, Frame, Opcode};
pub use inlet::{InletCode, InletReader};
pub use response::{
    ConcentrationTriplet, DecodedReading, FailureKind, InstrumentStatus, RawResponse,
    ReadFailure, ResponseParser,
};
pub use run::RunContext;
pub use scheduler::{Clock, SampleTick, SamplingScheduler, SystemClock};
pub use sink::{CsvLogs, RecordSink};
pub use stats::{RunSummary, SessionStats};
pub use transport::{Transport, TransportReader};
