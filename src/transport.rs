//! Byte transport to the analyzer.
//!
//! The analyzer answers a request within roughly 100 ms, but a long reply such as
//! `RD3` can trickle in over a couple of further 50 ms windows at 9600 baud. The
//! reader here polls how many bytes are waiting with a short staged backoff and then
//! takes whatever is there: a full reply, part of one, a bare NAK, or nothing.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::errors::{ConfigError, Result};
use crate::frame::Frame;

// ============================================================================
// Constants
// ============================================================================

/// Default serial baud rate for the analyzer.
pub const BAUD_RATE: u32 = 9600;

/// Idle read timeout applied when the port is opened.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Wait before the first look at the input buffer.
const INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Extra wait when fewer bytes than expected have arrived.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// How many extra waits are allowed before giving up.
const RETRIES: u32 = 2;

// ============================================================================
// Transport Abstraction
// ============================================================================

/// A full-duplex byte channel that can report how much input is waiting.
pub trait Transport: Read + Write + Send {
    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Drop any input still waiting in the receive buffer.
    fn discard_input(&mut self) -> io::Result<()> {
        let mut pending = self.bytes_available()?;
        let mut buf = [0u8; 64];
        while pending > 0 {
            let n = self.read(&mut buf[..pending.min(64)])?;
            if n == 0 {
                break;
            }
            pending = self.bytes_available()?;
        }
        Ok(())
    }
}

impl Transport for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        Ok(self.clear(ClearBuffer::Input)?)
    }
}

// ============================================================================
// Staged reader
// ============================================================================

/// Polls a [`Transport`] with a bounded, staged backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportReader {
    pub initial_delay: Duration,
    pub retry_delay: Duration,
    pub retries: u32,
}

impl Default for TransportReader {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_DELAY,
            retry_delay: RETRY_DELAY,
            retries: RETRIES,
        }
    }
}

impl TransportReader {
    /// A reader that never sleeps, for replaying captured traffic.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            retries: RETRIES,
        }
    }

    /// Longest time a single [`await_bytes`](Self::await_bytes) call sleeps.
    pub fn budget(&self) -> Duration {
        self.initial_delay + self.retry_delay * self.retries
    }

    /// Wait for up to `min_expected` bytes, then return whatever has arrived.
    ///
    /// Fewer bytes than expected (including none) is a normal outcome, not an error.
    pub fn await_bytes<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        min_expected: usize,
    ) -> io::Result<Vec<u8>> {
        std::thread::sleep(self.initial_delay);
        let mut available = transport.bytes_available()?;

        let mut attempt = 0;
        while available < min_expected && attempt < self.retries {
            trace!("{available}/{min_expected} bytes waiting, backing off");
            std::thread::sleep(self.retry_delay);
            available = transport.bytes_available()?;
            attempt += 1;
        }

        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        let mut filled = 0;
        while filled < available {
            match transport.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// Write one encoded frame. Completion is only confirmed by the reply that follows.
pub fn send_frame<T: Transport + ?Sized>(transport: &mut T, frame: &Frame) -> io::Result<()> {
    transport.write_all(frame.as_bytes())?;
    transport.flush()?;
    debug!("sent {}", frame.to_hex());
    Ok(())
}

// ============================================================================
// Serial settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    #[default]
    None,
    Odd,
    Even,
}

/// How to open the serial line to the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    /// 7 on the CLD 700 units in the field, but this differs between instruments.
    pub data_bits: u8,
    pub parity: ParitySetting,
    pub stop_bits: u8,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: BAUD_RATE,
            data_bits: 7,
            parity: ParitySetting::None,
            stop_bits: 1,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SerialSettings {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::EmptyPort);
        }
        self.data_bits()?;
        self.stop_bits()?;
        Ok(())
    }

    fn data_bits(&self) -> std::result::Result<DataBits, ConfigError> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ConfigError::DataBits(other)),
        }
    }

    fn stop_bits(&self) -> std::result::Result<StopBits, ConfigError> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(ConfigError::StopBits(other)),
        }
    }

    fn parity(&self) -> Parity {
        match self.parity {
            ParitySetting::None => Parity::None,
            ParitySetting::Odd => Parity::Odd,
            ParitySetting::Even => Parity::Even,
        }
    }
}

/// Open the serial line described by `settings`.
pub fn open_serial(settings: &SerialSettings) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(&settings.port, settings.baud_rate)
        .data_bits(settings.data_bits()?)
        .parity(settings.parity())
        .stop_bits(settings.stop_bits()?)
        .timeout(Duration::from_millis(settings.timeout_ms))
        .open()?;
    debug!(
        "opened {} at {} baud, {} data bits",
        settings.port, settings.baud_rate, settings.data_bits
    );
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Releases its reply in chunks, one chunk per `bytes_available` poll.
    struct Trickle {
        chunks: VecDeque<Vec<u8>>,
        rx: VecDeque<u8>,
        polls: usize,
        tx: Vec<u8>,
    }

    impl Trickle {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                rx: VecDeque::new(),
                polls: 0,
                tx: Vec::new(),
            }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Trickle {
        fn bytes_available(&mut self) -> io::Result<usize> {
            self.polls += 1;
            if let Some(chunk) = self.chunks.pop_front() {
                self.rx.extend(chunk);
            }
            Ok(self.rx.len())
        }
    }

    #[test]
    fn collects_reply_arriving_in_stages() {
        let mut t = Trickle::new(&[b"\x0601", b"1013", b"\x03\x00"]);
        let bytes = TransportReader::immediate().await_bytes(&mut t, 9).unwrap();
        assert_eq!(bytes, b"\x06011013\x03\x00");
        assert_eq!(t.polls, 3);
    }

    #[test]
    fn gives_up_after_bounded_retries() {
        let mut t = Trickle::new(&[b"\x06", b"0", b"1", b"more"]);
        let bytes = TransportReader::immediate().await_bytes(&mut t, 25).unwrap();
        // initial poll + two retries, the fourth chunk is never requested
        assert_eq!(bytes, b"\x0601");
        assert_eq!(t.polls, 3);
    }

    #[test]
    fn stops_polling_once_enough_bytes_arrived() {
        let mut t = Trickle::new(&[b"\x15\x30"]);
        let bytes = TransportReader::immediate().await_bytes(&mut t, 2).unwrap();
        assert_eq!(bytes, b"\x15\x30");
        assert_eq!(t.polls, 1);
    }

    #[test]
    fn silence_is_an_empty_read() {
        let mut t = Trickle::new(&[]);
        let bytes = TransportReader::immediate().await_bytes(&mut t, 8).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn discard_input_drains_stale_bytes() {
        let mut t = Trickle::new(&[b"stale reply"]);
        t.discard_input().unwrap();
        assert!(t.rx.is_empty());
    }

    #[test]
    fn send_frame_writes_whole_frame() {
        let mut t = Trickle::new(&[]);
        let frame = crate::frame::encode(1, "RD3");
        send_frame(&mut t, &frame).unwrap();
        assert_eq!(t.tx, frame.as_bytes());
    }

    #[test]
    fn default_budget_is_two_hundred_ms() {
        assert_eq!(TransportReader::default().budget(), Duration::from_millis(200));
    }

    #[test]
    fn serial_settings_validation() {
        let mut s = SerialSettings::default();
        assert_eq!(s.validate(), Ok(()));
        s.data_bits = 9;
        assert_eq!(s.validate(), Err(ConfigError::DataBits(9)));
        s.data_bits = 8;
        s.stop_bits = 3;
        assert_eq!(s.validate(), Err(ConfigError::StopBits(3)));
        s.stop_bits = 2;
        s.port = " ".into();
        assert_eq!(s.validate(), Err(ConfigError::EmptyPort));
    }
}
