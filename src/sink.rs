//! Append-only CSV logs: one for concentrations, one for instrument parameters.
//!
//! Files are named `<stub>_<YYYY-MM-DD>.csv` inside the data directory, get a header
//! row only when they are newly created, and use CRLF line endings. Both files stay
//! open for appending until the day rolls over or the logger stops.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, DriverError, Result};
use crate::inlet::InletCode;
use crate::response::{DecodedReading, InstrumentStatus, SENTINEL};

pub const CONCENTRATION_HEADER: &str = "DateTime, NO, NO2, NOx, inlet";

pub const PARAMETER_HEADER: &str = "DateTime, Instr stat d, Instr stat s, Error code, \
Warning code, Sample pressure, Reactor pressure, Instr amb temp, PMT temp, Reactor temp, \
Converter temp, Instr flow, Instr range";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LINE_END: &str = "\r\n";

// ============================================================================
// Row formatting
// ============================================================================

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `DateTime, NO, NO2, NOx, inlet`, with [`SENTINEL`] values for a failed reading.
pub fn concentration_row(at: &DateTime<Local>, reading: &DecodedReading, inlet: InletCode) -> String {
    let (no, no2, nox) = match reading {
        DecodedReading::Concentrations(c) => (c.no, c.no2, c.nox),
        _ => (SENTINEL, SENTINEL, SENTINEL),
    };
    format!(
        "{}, {no}, {no2}, {nox}, {}",
        format_timestamp(at),
        inlet.code()
    )
}

pub fn parameter_row(at: &DateTime<Local>, status: &InstrumentStatus) -> String {
    format!(
        "{}, {:08b}, {:08b}, {}, {}, {}, {}, {}, {}, {}, {}, {:?}, {}",
        format_timestamp(at),
        status.status_byte_d,
        status.status_byte_s,
        status.error_code,
        status.warning_code,
        status.sample_pressure_mbar,
        status.reactor_pressure_mbar,
        status.instr_temp_c,
        status.pmt_temp_c,
        status.reactor_temp_c,
        status.converter_temp_c,
        status.flow_lpm,
        status.range,
    )
}

// ============================================================================
// Sink
// ============================================================================

/// Destination for formatted log rows.
pub trait RecordSink {
    fn append_concentrations(&mut self, row: &str) -> Result<()>;
    fn append_parameters(&mut self, row: &str) -> Result<()>;
    /// Switch to the files for `day`.
    ///
    /// If the switch fails, later appends retry it rather than writing into the
    /// previous day's file.
    fn rollover(&mut self, day: NaiveDate) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub data_dir: PathBuf,
    pub concentration_stub: String,
    pub parameter_stub: String,
    /// Start a new parameter log every day. The concentration log always rotates.
    pub rotate_parameter_log_daily: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            concentration_stub: "NOxHTMdata".to_string(),
            parameter_stub: "NOxHTMinstrumentData".to_string(),
            rotate_parameter_log_daily: true,
        }
    }
}

impl OutputSettings {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.concentration_stub.trim().is_empty() {
            return Err(ConfigError::EmptyStub("concentration_stub"));
        }
        if self.parameter_stub.trim().is_empty() {
            return Err(ConfigError::EmptyStub("parameter_stub"));
        }
        Ok(())
    }
}

pub fn log_path(dir: &Path, stub: &str, day: NaiveDate) -> PathBuf {
    dir.join(format!("{stub}_{}.csv", day.format("%Y-%m-%d")))
}

/// One open, append-only CSV file.
struct DailyCsv {
    day: NaiveDate,
    path: PathBuf,
    file: File,
}

impl DailyCsv {
    fn open(dir: &Path, stub: &str, header: &str, day: NaiveDate) -> Result<Self> {
        let path = log_path(dir, stub, day);
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| log_error(&path, source))?;
        let mut csv = Self { day, path, file };
        if is_new {
            csv.write_line(header)?;
            info!("created {}", csv.path.display());
        } else {
            debug!("appending to {}", csv.path.display());
        }
        Ok(csv)
    }

    fn write_line(&mut self, row: &str) -> Result<()> {
        self.file
            .write_all(format!("{row}{LINE_END}").as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|source| log_error(&self.path, source))
    }
}

fn log_error(path: &Path, source: std::io::Error) -> DriverError {
    DriverError::LogFile {
        path: path.display().to_string(),
        source,
    }
}

/// The pair of day-stamped CSV logs.
pub struct CsvLogs {
    settings: OutputSettings,
    /// Day the logs should be on; an open file may lag behind after a failed rollover.
    day: NaiveDate,
    concentrations: DailyCsv,
    parameters: DailyCsv,
}

impl CsvLogs {
    pub fn open(settings: OutputSettings, day: NaiveDate) -> Result<Self> {
        fs::create_dir_all(&settings.data_dir)
            .map_err(|source| log_error(&settings.data_dir, source))?;
        let concentrations = DailyCsv::open(
            &settings.data_dir,
            &settings.concentration_stub,
            CONCENTRATION_HEADER,
            day,
        )?;
        let parameters = DailyCsv::open(
            &settings.data_dir,
            &settings.parameter_stub,
            PARAMETER_HEADER,
            day,
        )?;
        Ok(Self {
            settings,
            day,
            concentrations,
            parameters,
        })
    }

    fn current_concentrations(&mut self) -> Result<&mut DailyCsv> {
        if self.concentrations.day != self.day {
            self.concentrations = DailyCsv::open(
                &self.settings.data_dir,
                &self.settings.concentration_stub,
                CONCENTRATION_HEADER,
                self.day,
            )?;
        }
        Ok(&mut self.concentrations)
    }

    fn current_parameters(&mut self) -> Result<&mut DailyCsv> {
        if self.settings.rotate_parameter_log_daily && self.parameters.day != self.day {
            self.parameters = DailyCsv::open(
                &self.settings.data_dir,
                &self.settings.parameter_stub,
                PARAMETER_HEADER,
                self.day,
            )?;
        }
        Ok(&mut self.parameters)
    }

    pub fn concentration_path(&self) -> &Path {
        &self.concentrations.path
    }

    pub fn parameter_path(&self) -> &Path {
        &self.parameters.path
    }
}

impl RecordSink for CsvLogs {
    fn append_concentrations(&mut self, row: &str) -> Result<()> {
        self.current_concentrations()?.write_line(row)
    }

    fn append_parameters(&mut self, row: &str) -> Result<()> {
        self.current_parameters()?.write_line(row)
    }

    fn rollover(&mut self, day: NaiveDate) -> Result<()> {
        self.day = day;
        self.current_concentrations()?;
        self.current_parameters()?;
        Ok(())
    }
}
