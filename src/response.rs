//! Classification and field extraction for analyzer replies.
//!
//! Replies carry no length field and no type tag: the shape of a reply is
//! implied by the opcode that was sent. Everything in here works on whatever
//! bytes arrived within the read window and never panics on malformed input;
//! any offset or parse problem becomes a [`ReadFailure`].

use std::fmt;

use log::debug;
use thiserror::Error;

use crate::frame::{compute_bcc, hex, Opcode, ACK, ETX, NAK};

/// Value of the RS status byte when the instrument reports no errors (`@`).
pub const STATUS_NO_ERROR: u8 = 0x40;

/// Value written to the concentration log in place of a failed reading.
pub const SENTINEL: i64 = -999;

// ============================================================================
// Raw replies
// ============================================================================

/// How a reply starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ack,
    Nak,
    Unrecognized,
    Empty,
}

/// Bytes received from the instrument within one read window.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse(Vec<u8>);

impl RawResponse {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn classify(&self) -> Classification {
        classify(&self.0)
    }

    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }
}

impl From<Vec<u8>> for RawResponse {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

pub fn classify(raw: &[u8]) -> Classification {
    match raw.first() {
        None => Classification::Empty,
        Some(&ACK) => Classification::Ack,
        Some(&NAK) => Classification::Nak,
        Some(_) => Classification::Unrecognized,
    }
}

/// Result of comparing a reply's trailing BCC with the one computed over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BccCheck {
    Match,
    Mismatch { expected: u8, received: u8 },
    /// The reply does not end in `ETX BCC`.
    Missing,
}

// ============================================================================
// Failures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The instrument answered NAK.
    Nak,
    /// Unexpected leading byte, bad BCC or an unparsable payload.
    Garbled,
    /// Nothing arrived within the read budget.
    Empty,
    /// ACK, but fewer bytes or values than the reply shape requires.
    PartialPayload { expected: usize, found: usize },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Nak => f.write_str("NAK"),
            FailureKind::Garbled => f.write_str("garbled reply"),
            FailureKind::Empty => f.write_str("nothing received"),
            FailureKind::PartialPayload { expected, found } => {
                write!(f, "partial payload ({found} of {expected})")
            }
        }
    }
}

/// A read that produced no usable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{opcode}: {kind} [{}]", hex(.raw))]
pub struct ReadFailure {
    pub opcode: Opcode,
    pub kind: FailureKind,
    /// The bytes that were received, for diagnostics.
    pub raw: Vec<u8>,
}

impl ReadFailure {
    fn new(opcode: Opcode, kind: FailureKind, raw: &[u8]) -> Self {
        Self {
            opcode,
            kind,
            raw: raw.to_vec(),
        }
    }
}

// ============================================================================
// Decoded values
// ============================================================================

/// NO, NO2 and NOx in ppb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcentrationTriplet {
    pub no: i64,
    pub no2: i64,
    pub nox: i64,
}

/// One instrument-parameter sample, assembled from the nine parameter reads.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentStatus {
    /// RS status byte; [`STATUS_NO_ERROR`] when the instrument is healthy.
    pub error_flags: u8,
    pub status_byte_d: u8,
    pub status_byte_s: u8,
    pub error_code: String,
    pub warning_code: String,
    pub sample_pressure_mbar: i32,
    pub reactor_pressure_mbar: i32,
    pub instr_temp_c: i32,
    pub pmt_temp_c: i32,
    pub reactor_temp_c: i32,
    pub converter_temp_c: i32,
    pub flow_lpm: f64,
    pub range: char,
}

impl InstrumentStatus {
    pub fn has_error(&self) -> bool {
        self.error_flags != STATUS_NO_ERROR
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedReading {
    Concentrations(ConcentrationTriplet),
    Status(InstrumentStatus),
    Failure(ReadFailure),
}

impl DecodedReading {
    pub fn is_failure(&self) -> bool {
        matches!(self, DecodedReading::Failure(_))
    }
}

impl From<Result<InstrumentStatus, ReadFailure>> for DecodedReading {
    fn from(status: Result<InstrumentStatus, ReadFailure>) -> Self {
        match status {
            Ok(status) => DecodedReading::Status(status),
            Err(failure) => DecodedReading::Failure(failure),
        }
    }
}

/// The RS reply fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFields {
    pub error_flags: u8,
    pub status_byte_d: u8,
    pub status_byte_s: u8,
    pub error_code: String,
    pub warning_code: String,
}

/// A single decoded parameter reply.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Status(StatusFields),
    /// Pressure (mbar) or temperature (°C).
    Integer(i32),
    Flow(f64),
    Range(char),
    Concentrations(ConcentrationTriplet),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Status(s) => write!(
                f,
                "flags={:08b} d={:08b} s={:08b} error={} warning={}",
                s.error_flags, s.status_byte_d, s.status_byte_s, s.error_code, s.warning_code
            ),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Flow(v) => write!(f, "{v:?}"),
            FieldValue::Range(c) => write!(f, "{c}"),
            FieldValue::Concentrations(c) => {
                write!(f, "NO={} NO2={} NOx={} ppb", c.no, c.no2, c.nox)
            }
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Turns raw replies into typed values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseParser {
    verify_bcc: bool,
}

impl ResponseParser {
    pub fn new(verify_bcc: bool) -> Self {
        Self { verify_bcc }
    }

    /// Compare the reply's last byte with the XOR of everything up to and including
    /// the ETX just before it.
    pub fn check_bcc(raw: &[u8]) -> BccCheck {
        let len = raw.len();
        if len < 2 || raw[len - 2] != ETX {
            return BccCheck::Missing;
        }
        let expected = compute_bcc(&raw[..len - 1]);
        let received = raw[len - 1];
        if expected == received {
            BccCheck::Match
        } else {
            BccCheck::Mismatch { expected, received }
        }
    }

    /// Decode the reply to `opcode` into its field value.
    pub fn decode_field(&self, opcode: Opcode, raw: &[u8]) -> Result<FieldValue, ReadFailure> {
        self.accept(opcode, raw)?;
        match opcode {
            Opcode::Rd3 => decode_concentrations(raw).map(FieldValue::Concentrations),
            Opcode::Rs => decode_status(raw).map(FieldValue::Status),
            Opcode::Rp0 | Opcode::Rp1 => decode_integer(opcode, raw, 3..7).map(FieldValue::Integer),
            Opcode::Rt0 | Opcode::Rt1 | Opcode::Rt2 | Opcode::Rt3 => {
                decode_integer(opcode, raw, 3..6).map(FieldValue::Integer)
            }
            Opcode::Rf => decode_flow(raw).map(FieldValue::Flow),
            Opcode::Rr => match raw.get(3) {
                Some(&code) => Ok(FieldValue::Range(char::from(code))),
                None => Err(partial(opcode, raw, 4)),
            },
        }
    }

    /// Decode a reply to `RD3`.
    pub fn decode_concentrations(&self, raw: &[u8]) -> DecodedReading {
        match self
            .accept(Opcode::Rd3, raw)
            .and_then(|()| decode_concentrations(raw))
        {
            Ok(c) => DecodedReading::Concentrations(c),
            Err(failure) => DecodedReading::Failure(failure),
        }
    }

    /// Assemble an instrument-status sample from replies to [`Opcode::PARAMETER_READS`].
    ///
    /// The first reply that fails to decode fails the whole sample.
    pub fn decode_instrument_status(
        &self,
        replies: &[(Opcode, RawResponse)],
    ) -> Result<InstrumentStatus, ReadFailure> {
        let mut status: Option<StatusFields> = None;
        let mut ints = [None::<i32>; 6];
        let mut flow = None;
        let mut range = None;

        for (opcode, raw) in replies {
            let value = self.decode_field(*opcode, raw.as_bytes())?;
            match (opcode, value) {
                (Opcode::Rs, FieldValue::Status(s)) => status = Some(s),
                (Opcode::Rp0, FieldValue::Integer(v)) => ints[0] = Some(v),
                (Opcode::Rp1, FieldValue::Integer(v)) => ints[1] = Some(v),
                (Opcode::Rt0, FieldValue::Integer(v)) => ints[2] = Some(v),
                (Opcode::Rt1, FieldValue::Integer(v)) => ints[3] = Some(v),
                (Opcode::Rt2, FieldValue::Integer(v)) => ints[4] = Some(v),
                (Opcode::Rt3, FieldValue::Integer(v)) => ints[5] = Some(v),
                (Opcode::Rf, FieldValue::Flow(v)) => flow = Some(v),
                (Opcode::Rr, FieldValue::Range(c)) => range = Some(c),
                _ => {}
            }
        }

        // A missing reply is reported against the first opcode that has no value.
        let missing = |op: Opcode| ReadFailure::new(op, FailureKind::Empty, &[]);
        let status = status.ok_or_else(|| missing(Opcode::Rs))?;
        let int = |i: usize| ints[i].ok_or_else(|| missing(Opcode::PARAMETER_READS[i + 1]));

        Ok(InstrumentStatus {
            error_flags: status.error_flags,
            status_byte_d: status.status_byte_d,
            status_byte_s: status.status_byte_s,
            error_code: status.error_code,
            warning_code: status.warning_code,
            sample_pressure_mbar: int(0)?,
            reactor_pressure_mbar: int(1)?,
            instr_temp_c: int(2)?,
            pmt_temp_c: int(3)?,
            reactor_temp_c: int(4)?,
            converter_temp_c: int(5)?,
            flow_lpm: flow.ok_or_else(|| missing(Opcode::Rf))?,
            range: range.ok_or_else(|| missing(Opcode::Rr))?,
        })
    }

    /// Classification and (optionally) BCC gate shared by every decoder.
    fn accept(&self, opcode: Opcode, raw: &[u8]) -> Result<(), ReadFailure> {
        match classify(raw) {
            Classification::Ack => {}
            Classification::Nak => return Err(ReadFailure::new(opcode, FailureKind::Nak, raw)),
            Classification::Empty => {
                return Err(ReadFailure::new(opcode, FailureKind::Empty, raw))
            }
            Classification::Unrecognized => {
                return Err(ReadFailure::new(opcode, FailureKind::Garbled, raw))
            }
        }

        match Self::check_bcc(raw) {
            BccCheck::Match => Ok(()),
            check if self.verify_bcc => {
                debug!("{opcode}: rejecting reply, BCC check {check:?}");
                Err(ReadFailure::new(opcode, FailureKind::Garbled, raw))
            }
            BccCheck::Mismatch { expected, received } => {
                debug!(
                    "{opcode}: BCC mismatch ignored (expected {expected:#04X}, received {received:#04X})"
                );
                Ok(())
            }
            BccCheck::Missing => Ok(()),
        }
    }
}

fn partial(opcode: Opcode, raw: &[u8], expected: usize) -> ReadFailure {
    ReadFailure::new(
        opcode,
        FailureKind::PartialPayload {
            expected,
            found: raw.len(),
        },
        raw,
    )
}

fn garbled(opcode: Opcode, raw: &[u8]) -> ReadFailure {
    ReadFailure::new(opcode, FailureKind::Garbled, raw)
}

/// Payload between index 3 and the first ETX after it: `"0.012, 0.020, 0.032"`.
fn decode_concentrations(raw: &[u8]) -> Result<ConcentrationTriplet, ReadFailure> {
    let op = Opcode::Rd3;
    let tail = raw.get(3..).unwrap_or_default();
    let end = tail
        .iter()
        .position(|&b| b == ETX)
        .ok_or_else(|| garbled(op, raw))?;
    let text = std::str::from_utf8(&tail[..end]).map_err(|_| garbled(op, raw))?;
    let text = text.replace(',', " ");

    let mut tokens = text.split_whitespace().peekable();
    // Some firmware echoes the opcode in front of the values.
    if tokens.peek() == Some(&op.token()) {
        tokens.next();
    }
    let values = tokens
        .map(parse_finite)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| garbled(op, raw))?;

    match values.as_slice() {
        [no, no2, nox] => Ok(ConcentrationTriplet {
            no: ppm_to_ppb(*no),
            no2: ppm_to_ppb(*no2),
            nox: ppm_to_ppb(*nox),
        }),
        _ => Err(ReadFailure::new(
            op,
            FailureKind::PartialPayload {
                expected: 3,
                found: values.len(),
            },
            raw,
        )),
    }
}

/// Scale ppm to ppb, truncating toward zero.
pub fn ppm_to_ppb(ppm: f64) -> i64 {
    (ppm * 1000.0) as i64
}

fn decode_status(raw: &[u8]) -> Result<StatusFields, ReadFailure> {
    if raw.len() < 11 {
        return Err(partial(Opcode::Rs, raw, Opcode::Rs.expected_len()));
    }
    Ok(StatusFields {
        error_flags: raw[1],
        status_byte_d: raw[3],
        status_byte_s: raw[4],
        error_code: String::from_utf8_lossy(&raw[6..8]).into_owned(),
        warning_code: String::from_utf8_lossy(&raw[9..11]).into_owned(),
    })
}

fn field_text(opcode: Opcode, raw: &[u8], at: std::ops::Range<usize>) -> Result<&str, ReadFailure> {
    let bytes = raw
        .get(at.clone())
        .ok_or_else(|| partial(opcode, raw, opcode.expected_len()))?;
    std::str::from_utf8(bytes)
        .map(str::trim)
        .map_err(|_| garbled(opcode, raw))
}

fn decode_integer(
    opcode: Opcode,
    raw: &[u8],
    at: std::ops::Range<usize>,
) -> Result<i32, ReadFailure> {
    field_text(opcode, raw, at)?
        .parse::<i32>()
        .map_err(|_| garbled(opcode, raw))
}

fn decode_flow(raw: &[u8]) -> Result<f64, ReadFailure> {
    parse_finite(field_text(Opcode::Rf, raw, 3..6)?).ok_or_else(|| garbled(Opcode::Rf, raw))
}

/// `f64` text that is a real number; `NaN` and `inf` are not readings.
fn parse_finite(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}
