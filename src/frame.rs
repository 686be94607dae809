//! Command framing for the analyzer's serial protocol.
//!
//! Every request is a short ASCII frame:
//!
//! ```text
//! STX | id (2 ASCII digits) | opcode (ASCII) | ETX | BCC
//! ```
//!
//! The block check character (BCC) is the XOR of every byte from STX through ETX
//! inclusive. The instrument silently ignores frames with a wrong BCC, so the
//! computation here must match it exactly.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// Start of text.
pub const STX: u8 = 0x02;
/// End of text.
pub const ETX: u8 = 0x03;
/// Positive acknowledgement, payload follows.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement, the instrument rejected the command.
pub const NAK: u8 = 0x15;

/// Highest instrument id that still encodes as two digits.
pub const MAX_INSTRUMENT_ID: u8 = 99;

// ============================================================================
// Opcodes
// ============================================================================

/// Read commands understood by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// NO, NO2 and NOx concentrations as ppm text.
    Rd3,
    /// Instrument status bytes, error and warning codes.
    Rs,
    /// Sample pressure, mbar.
    Rp0,
    /// Reactor pressure, mbar.
    Rp1,
    /// Instrument ambient temperature, °C.
    Rt0,
    /// PMT temperature, °C.
    Rt1,
    /// Reactor temperature, °C.
    Rt2,
    /// Converter temperature, °C.
    Rt3,
    /// Sample flow, lpm.
    Rf,
    /// Measurement range.
    Rr,
}

impl Opcode {
    /// The parameter reads that make up one instrument-status sample, in wire order.
    pub const PARAMETER_READS: [Opcode; 9] = [
        Opcode::Rs,
        Opcode::Rp0,
        Opcode::Rp1,
        Opcode::Rt0,
        Opcode::Rt1,
        Opcode::Rt2,
        Opcode::Rt3,
        Opcode::Rf,
        Opcode::Rr,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Opcode::Rd3 => "RD3",
            Opcode::Rs => "RS",
            Opcode::Rp0 => "RP0",
            Opcode::Rp1 => "RP1",
            Opcode::Rt0 => "RT0",
            Opcode::Rt1 => "RT1",
            Opcode::Rt2 => "RT2",
            Opcode::Rt3 => "RT3",
            Opcode::Rf => "RF",
            Opcode::Rr => "RR",
        }
    }

    /// Number of bytes a complete reply to this opcode occupies.
    ///
    /// Replies carry no length field; this is how many bytes the transport waits for.
    pub fn expected_len(self) -> usize {
        match self {
            Opcode::Rd3 => 25,
            Opcode::Rs => 13,
            Opcode::Rp0 | Opcode::Rp1 => 9,
            Opcode::Rt0 | Opcode::Rt1 | Opcode::Rt2 | Opcode::Rt3 => 8,
            Opcode::Rf | Opcode::Rr => 8,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Opcode {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_ascii_uppercase().as_str() {
            "RD3" => Opcode::Rd3,
            "RS" => Opcode::Rs,
            "RP0" => Opcode::Rp0,
            "RP1" => Opcode::Rp1,
            "RT0" => Opcode::Rt0,
            "RT1" => Opcode::Rt1,
            "RT2" => Opcode::Rt2,
            "RT3" => Opcode::Rt3,
            "RF" => Opcode::Rf,
            "RR" => Opcode::Rr,
            _ => return Err(FrameError::UnknownOpcode(s.to_string())),
        };
        Ok(op)
    }
}

// ============================================================================
// Frames
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),
    #[error("frame does not start with STX")]
    MissingStx,
    #[error("frame has no ETX before the BCC")]
    MissingEtx,
    #[error("BCC mismatch (expected {expected:#04X}, received {received:#04X})")]
    Bcc { expected: u8, received: u8 },
    #[error("instrument id is not two ASCII digits")]
    BadInstrumentId,
}

/// A request to one instrument on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub instrument_id: u8,
    pub opcode: Opcode,
}

impl Command {
    pub fn new(instrument_id: u8, opcode: Opcode) -> Self {
        Self {
            instrument_id,
            opcode,
        }
    }

    pub fn encode(&self) -> Frame {
        encode(self.instrument_id, self.opcode.token())
    }
}

/// An encoded request, ready to be written to the serial channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split a frame back into its instrument id and opcode text, checking STX, ETX and BCC.
    pub fn parse(bytes: &[u8]) -> Result<(u8, String), FrameError> {
        // STX + 2 id digits + at least one opcode byte + ETX + BCC
        if bytes.len() < 6 {
            return Err(FrameError::TooShort(bytes.len()));
        }
        if bytes[0] != STX {
            return Err(FrameError::MissingStx);
        }
        let bcc_at = bytes.len() - 1;
        if bytes[bcc_at - 1] != ETX {
            return Err(FrameError::MissingEtx);
        }
        let expected = compute_bcc(&bytes[..bcc_at]);
        if expected != bytes[bcc_at] {
            return Err(FrameError::Bcc {
                expected,
                received: bytes[bcc_at],
            });
        }

        let id = std::str::from_utf8(&bytes[1..3])
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or(FrameError::BadInstrumentId)?;
        let opcode = String::from_utf8_lossy(&bytes[3..bcc_at - 1]).into_owned();
        Ok((id, opcode))
    }

    /// Space-separated upper-case hex, as printed in diagnostics.
    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Build `STX + id + opcode + ETX + BCC`.
///
/// `instrument_id` must be at most [`MAX_INSTRUMENT_ID`]; configuration validation
/// guarantees that before any frame is built.
pub fn encode(instrument_id: u8, opcode: &str) -> Frame {
    debug_assert!(instrument_id <= MAX_INSTRUMENT_ID);

    let mut bytes = Vec::with_capacity(opcode.len() + 5);
    bytes.push(STX);
    bytes.extend_from_slice(format!("{instrument_id:02}").as_bytes());
    bytes.extend_from_slice(opcode.as_bytes());
    bytes.push(ETX);
    let bcc = compute_bcc(&bytes);
    bytes.push(bcc);
    Frame(bytes)
}

/// XOR of every byte in `bytes`.
///
/// For a request this is called on STX..=ETX, i.e. everything except the BCC itself.
pub fn compute_bcc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
