//! Which sampling line the analyzer is currently drawing from.
//!
//! The inlet valve controller raises one of five digital lines. They are checked in
//! priority order and the first asserted line wins.

use std::fs;
use std::path::PathBuf;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{DriverError, Result};

/// Number of inlet selector lines.
pub const INLET_LINES: usize = 5;

/// Inlet code as written to the concentration log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InletCode {
    TestGas,
    Line5m,
    Line30m,
    Line70m,
    Line150m,
    /// No selector line asserted.
    NoValidInlet,
}

impl InletCode {
    /// Codes in the same priority order as the selector lines.
    pub const PRIORITY: [InletCode; INLET_LINES] = [
        InletCode::TestGas,
        InletCode::Line5m,
        InletCode::Line30m,
        InletCode::Line70m,
        InletCode::Line150m,
    ];

    pub fn code(self) -> u8 {
        match self {
            InletCode::TestGas => 6,
            InletCode::Line5m => 3,
            InletCode::Line30m => 2,
            InletCode::Line70m => 1,
            InletCode::Line150m => 0,
            InletCode::NoValidInlet => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        [InletCode::NoValidInlet]
            .into_iter()
            .chain(Self::PRIORITY)
            .find(|c| c.code() == code)
    }

    /// First asserted line in priority order.
    pub fn from_lines(lines: [bool; INLET_LINES]) -> Self {
        Self::PRIORITY
            .into_iter()
            .zip(lines)
            .find_map(|(code, high)| high.then_some(code))
            .unwrap_or(InletCode::NoValidInlet)
    }
}

/// Source of the current inlet code.
pub trait InletReader {
    fn read(&mut self) -> InletCode;
}

/// Always reports the same inlet, for installations without a selector.
#[derive(Debug, Clone, Copy)]
pub struct FixedInlet(pub InletCode);

impl InletReader for FixedInlet {
    fn read(&mut self) -> InletCode {
        self.0
    }
}

/// Raw digital input lines.
pub trait DigitalInputs {
    fn read_line(&mut self, line: u32) -> Result<bool>;
}

/// Maps five digital lines onto an [`InletCode`].
pub struct PinInletReader<D: DigitalInputs> {
    inputs: D,
    pins: [u32; INLET_LINES],
}

impl<D: DigitalInputs> PinInletReader<D> {
    pub fn new(inputs: D, pins: [u32; INLET_LINES]) -> Self {
        Self { inputs, pins }
    }
}

impl<D: DigitalInputs> InletReader for PinInletReader<D> {
    fn read(&mut self) -> InletCode {
        let mut lines = [false; INLET_LINES];
        for (level, &pin) in lines.iter_mut().zip(&self.pins) {
            *level = match self.inputs.read_line(pin) {
                Ok(high) => high,
                Err(e) => {
                    warn!("inlet line {pin} unreadable: {e}");
                    false
                }
            };
        }
        InletCode::from_lines(lines)
    }
}

// ============================================================================
// sysfs GPIO
// ============================================================================

/// Inputs read through the Linux sysfs GPIO interface.
///
/// Lines are exported and set to input on construction and unexported on drop.
pub struct SysfsGpio {
    root: PathBuf,
    exported: Vec<u32>,
}

impl SysfsGpio {
    pub fn open(lines: &[u32]) -> Result<Self> {
        Self::open_at(PathBuf::from("/sys/class/gpio"), lines)
    }

    /// Open below a different sysfs root.
    pub fn open_at(root: PathBuf, lines: &[u32]) -> Result<Self> {
        let mut gpio = Self {
            root,
            exported: Vec::new(),
        };
        for &line in lines {
            gpio.configure(line, "in")?;
        }
        debug!("gpio inputs ready: {lines:?}");
        Ok(gpio)
    }

    /// Make `line` an output driven low, e.g. to keep the purge pump off.
    pub fn hold_low(&mut self, line: u32) -> Result<()> {
        // "low" switches to output and clears the level in one write
        self.configure(line, "low")?;
        debug!("gpio output {line} held low");
        Ok(())
    }

    fn configure(&mut self, line: u32, direction: &str) -> Result<()> {
        let dir = self.line_dir(line);
        if !dir.exists() {
            fs::write(self.root.join("export"), line.to_string())
                .map_err(|source| DriverError::Gpio { line, source })?;
            self.exported.push(line);
        }
        fs::write(dir.join("direction"), direction)
            .map_err(|source| DriverError::Gpio { line, source })
    }

    fn line_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }
}

impl DigitalInputs for SysfsGpio {
    fn read_line(&mut self, line: u32) -> Result<bool> {
        let value = fs::read_to_string(self.line_dir(line).join("value"))
            .map_err(|source| DriverError::Gpio { line, source })?;
        Ok(value.trim() == "1")
    }
}

impl Drop for SysfsGpio {
    fn drop(&mut self) {
        for &line in &self.exported {
            if let Err(e) = fs::write(self.root.join("unexport"), line.to_string()) {
                warn!("failed to release gpio line {line}: {e}");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InletSource {
    #[default]
    Gpio,
    Fixed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakePins(HashMap<u32, bool>);

    impl DigitalInputs for FakePins {
        fn read_line(&mut self, line: u32) -> Result<bool> {
            self.0.get(&line).copied().ok_or_else(|| DriverError::Gpio {
                line,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    const PINS: [u32; INLET_LINES] = [5, 6, 13, 19, 26];

    fn reader(high: &[u32]) -> PinInletReader<FakePins> {
        let map = PINS.iter().map(|&p| (p, high.contains(&p))).collect();
        PinInletReader::new(FakePins(map), PINS)
    }

    #[test]
    fn first_asserted_line_wins() {
        assert_eq!(reader(&[5, 26]).read(), InletCode::TestGas);
        assert_eq!(reader(&[13, 19]).read(), InletCode::Line30m);
        assert_eq!(reader(&[26]).read().code(), 0);
        assert_eq!(reader(&[6]).read().code(), 3);
    }

    #[test]
    fn nothing_asserted_is_code_nine() {
        assert_eq!(reader(&[]).read(), InletCode::NoValidInlet);
        assert_eq!(InletCode::NoValidInlet.code(), 9);
    }

    #[test]
    fn unreadable_line_counts_as_low() {
        let mut r = PinInletReader::new(FakePins(HashMap::from([(19, true)])), PINS);
        assert_eq!(r.read(), InletCode::Line70m);
    }

    #[test]
    fn codes_map_back() {
        for code in [0, 1, 2, 3, 6, 9] {
            assert_eq!(InletCode::from_code(code).map(InletCode::code), Some(code));
        }
        assert_eq!(InletCode::from_code(4), None);
    }

    #[test]
    fn sysfs_lines_are_read_and_released() {
        let root = tempfile::tempdir().unwrap();
        // Pretend line 6 is already exported by someone else.
        fs::create_dir_all(root.path().join("gpio6")).unwrap();
        fs::create_dir_all(root.path().join("gpio5")).unwrap();
        fs::write(root.path().join("gpio6/value"), "1\n").unwrap();
        fs::write(root.path().join("gpio5/value"), "0\n").unwrap();

        let mut gpio = SysfsGpio::open_at(root.path().to_path_buf(), &[5, 6]).unwrap();
        assert!(gpio.read_line(6).unwrap());
        assert!(!gpio.read_line(5).unwrap());
        assert_eq!(
            fs::read_to_string(root.path().join("gpio5/direction")).unwrap(),
            "in"
        );
        drop(gpio);
        // Neither line was exported by us, so nothing is unexported.
        assert!(!root.path().join("unexport").exists());
    }

    #[test]
    fn pump_line_is_driven_low() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("gpio24")).unwrap();

        let mut gpio = SysfsGpio::open_at(root.path().to_path_buf(), &[]).unwrap();
        gpio.hold_low(24).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("gpio24/direction")).unwrap(),
            "low"
        );
    }
}
