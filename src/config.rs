//! # Configuration
//!
//! The logger reads a single YAML file at startup:
//!
//! ```yaml
//! serial:
//!   port: /dev/ttyUSB0
//!   baud_rate: 9600
//!   data_bits: 7
//!   parity: none
//!   stop_bits: 1
//!   timeout_ms: 1000
//! instrument:
//!   id: 1
//!   verify_bcc: false
//! sampling:
//!   sample_interval_secs: 10.0
//!   parameter_interval_secs: 900
//! output:
//!   data_dir: data
//!   concentration_stub: NOxHTMdata
//!   parameter_stub: NOxHTMinstrumentData
//!   rotate_parameter_log_daily: true
//! inlet:
//!   source: gpio
//!   pins: [5, 6, 13, 19, 26]
//!   fixed_code: 9
//!   pump_pin: 24
//! ```
//!
//! Every section and key is optional. A missing file is written out with the
//! defaults so it can be edited in place.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::frame::MAX_INSTRUMENT_ID;
use crate::inlet::{InletCode, InletSource, INLET_LINES};
use crate::scheduler::MAX_PARAMETER_INTERVAL_SECS;
use crate::sink::OutputSettings;
use crate::transport::SerialSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Address on the line, sent as two ASCII digits.
    pub id: u8,
    /// Reject replies whose trailing BCC does not match.
    ///
    /// Off by default: the analyzers in service have never been checked for a
    /// consistent reply BCC.
    pub verify_bcc: bool,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            id: 1,
            verify_bcc: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    /// Main sample interval; ticks are aligned to multiples of it.
    pub sample_interval_secs: f64,
    /// Instrument-parameter interval within the hour, at most 3600.
    pub parameter_interval_secs: u32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            sample_interval_secs: 10.0,
            parameter_interval_secs: 900,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InletSettings {
    pub source: InletSource,
    /// Selector lines in priority order: test gas, 5 m, 30 m, 70 m, 150 m.
    pub pins: Vec<u32>,
    /// Code reported when `source` is `fixed`.
    pub fixed_code: u8,
    /// Purge pump output, held low at startup with the `gpio` source.
    pub pump_pin: Option<u32>,
}

impl Default for InletSettings {
    fn default() -> Self {
        Self {
            source: InletSource::Gpio,
            pins: vec![5, 6, 13, 19, 26],
            fixed_code: InletCode::NoValidInlet.code(),
            pump_pin: Some(24),
        }
    }
}

impl InletSettings {
    pub fn pin_array(&self) -> std::result::Result<[u32; INLET_LINES], ConfigError> {
        self.pins
            .as_slice()
            .try_into()
            .map_err(|_| ConfigError::InletPins {
                expected: INLET_LINES,
                found: self.pins.len(),
            })
    }

    pub fn fixed_inlet(&self) -> InletCode {
        InletCode::from_code(self.fixed_code).unwrap_or(InletCode::NoValidInlet)
    }
}

/// Everything the run loop needs, loaded once and shared by reference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub serial: SerialSettings,
    pub instrument: InstrumentSettings,
    pub sampling: SamplingSettings,
    pub output: OutputSettings,
    pub inlet: InletSettings,
}

impl RunConfig {
    /// Load from `path`, writing a default file first if none exists.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("configuration file not found at {:?}, creating default", path);
            let config = Self::default();
            config.save_to_file(path)?;
            return Ok(config);
        }

        debug!("loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;
        let config: RunConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yml::to_string(self).context("Failed to serialize configuration")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write configuration file at {:?}", path))?;
        Ok(())
    }

    /// Apply command line overrides.
    pub fn apply_args(&mut self, port: Option<String>, data_dir: Option<PathBuf>) {
        if let Some(port) = port {
            self.serial.port = port;
        }
        if let Some(dir) = data_dir {
            self.output.data_dir = dir;
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.serial.validate()?;
        if self.instrument.id > MAX_INSTRUMENT_ID {
            return Err(ConfigError::InstrumentId(self.instrument.id));
        }
        let interval = self.sampling.sample_interval_secs;
        if !interval.is_finite() || (interval * 1000.0).round() < 1.0 {
            return Err(ConfigError::SampleInterval(interval));
        }
        let param = self.sampling.parameter_interval_secs;
        if param == 0 || param > MAX_PARAMETER_INTERVAL_SECS {
            return Err(ConfigError::ParameterInterval(param));
        }
        self.output.validate()?;
        if self.inlet.source == InletSource::Gpio {
            self.inlet.pin_array()?;
            if let Some(pump) = self.inlet.pump_pin.filter(|p| self.inlet.pins.contains(p)) {
                return Err(ConfigError::PumpPin(pump));
            }
        }
        Ok(())
    }
}
