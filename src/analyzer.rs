//! Driver for CLD 700 type chemiluminescence NOx analyzers.
//!
//! One transaction is strictly request/response on a single serial line:
//!
//! 1. drop whatever is still waiting in the receive buffer,
//! 2. write the encoded [`Frame`],
//! 3. poll for the reply with the staged backoff of [`TransportReader`],
//! 4. hand the bytes to the [`ResponseParser`].
//!
//! Protocol trouble (NAK, garbled or missing replies) is returned as a
//! [`DecodedReading::Failure`] value. Only I/O faults on the channel itself are
//! errors.
//!
//! NAK replies are reported but never resent, and status error codes are only
//! reported; clearing them needs an operator at the instrument.

use log::{debug, warn};
use serialport::SerialPort;

use crate::errors::Result;
use crate::frame::{Command, Frame, Opcode};
use crate::response::{
    DecodedReading, FailureKind, FieldValue, InstrumentStatus, RawResponse, ReadFailure,
    ResponseParser,
};
use crate::transport::{self, SerialSettings, Transport, TransportReader};

/// Everything `probe` saw for one command.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub frame: Frame,
    pub response: RawResponse,
    pub decoded: std::result::Result<FieldValue, ReadFailure>,
}

/// NOx analyzer driver.
///
/// # Example
/// ```ignore
/// let mut analyzer = NoxAnalyzer::connect_serial(&settings, 1, false)?;
/// match analyzer.read_concentrations()? {
///     DecodedReading::Concentrations(c) => println!("NOx {} ppb", c.nox),
///     other => println!("no reading: {other:?}"),
/// }
/// ```
pub struct NoxAnalyzer {
    transport: Box<dyn Transport>,
    instrument_id: u8,
    reader: TransportReader,
    parser: ResponseParser,
}

impl NoxAnalyzer {
    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// Open the serial line and attach a driver to it.
    pub fn connect_serial(
        settings: &SerialSettings,
        instrument_id: u8,
        verify_bcc: bool,
    ) -> Result<Self> {
        let port: Box<dyn SerialPort> = transport::open_serial(settings)?;
        Ok(Self::from_transport(Box::new(port), instrument_id, verify_bcc))
    }

    /// Create a driver over an already-open transport.
    pub fn from_transport(
        transport: Box<dyn Transport>,
        instrument_id: u8,
        verify_bcc: bool,
    ) -> Self {
        Self {
            transport,
            instrument_id,
            reader: TransportReader::default(),
            parser: ResponseParser::new(verify_bcc),
        }
    }

    /// Replace the polling schedule (tests replay captured traffic without sleeping).
    pub fn with_reader(mut self, reader: TransportReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn instrument_id(&self) -> u8 {
        self.instrument_id
    }

    // ------------------------------------------------------------------------
    // Instrument Commands
    // ------------------------------------------------------------------------

    /// Read NO, NO2 and NOx (`RD3`).
    pub fn read_concentrations(&mut self) -> Result<DecodedReading> {
        let raw = self.transact(Opcode::Rd3)?;
        let reading = self.parser.decode_concentrations(raw.as_bytes());
        if let DecodedReading::Failure(failure) = &reading {
            report_failure(failure);
        }
        Ok(reading)
    }

    /// Read the nine instrument parameters and assemble one status sample.
    ///
    /// All nine commands are sent even when an early one fails, so the line stays in
    /// step with the instrument. The outer error is a channel fault, the inner one a
    /// reply that could not be used.
    pub fn read_instrument_status(
        &mut self,
    ) -> Result<std::result::Result<InstrumentStatus, ReadFailure>> {
        let mut replies = Vec::with_capacity(Opcode::PARAMETER_READS.len());
        for opcode in Opcode::PARAMETER_READS {
            replies.push((opcode, self.transact(opcode)?));
        }

        let status = self.parser.decode_instrument_status(&replies);
        match &status {
            Ok(status) if status.has_error() => {
                warn!(
                    "instrument reports error flags {:08b} (error code {}, warning code {})",
                    status.error_flags, status.error_code, status.warning_code
                );
            }
            Err(failure) => report_failure(failure),
            Ok(_) => {}
        }
        Ok(status)
    }

    /// Send a single command and report the frame, raw reply and decoded value.
    pub fn probe(&mut self, opcode: Opcode) -> Result<ProbeReport> {
        let frame = Command::new(self.instrument_id, opcode).encode();
        let response = self.transact(opcode)?;
        let decoded = self.parser.decode_field(opcode, response.as_bytes());
        Ok(ProbeReport {
            frame,
            response,
            decoded,
        })
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    /// One request/response exchange.
    fn transact(&mut self, opcode: Opcode) -> Result<RawResponse> {
        let stale = self.transport.bytes_available()?;
        if stale > 0 {
            debug!("discarding {stale} stale bytes before {opcode}");
            self.transport.discard_input()?;
        }

        let frame = Command::new(self.instrument_id, opcode).encode();
        transport::send_frame(self.transport.as_mut(), &frame)?;

        let bytes = self
            .reader
            .await_bytes(self.transport.as_mut(), opcode.expected_len())?;
        let raw = RawResponse::new(bytes);
        debug!("{opcode}: received {} bytes [{}]", raw.len(), raw.to_hex());
        Ok(raw)
    }
}

impl Drop for NoxAnalyzer {
    fn drop(&mut self) {
        debug!("closing analyzer channel (instrument {:02})", self.instrument_id);
    }
}

fn report_failure(failure: &ReadFailure) {
    match failure.kind {
        FailureKind::Nak => warn!("NAK from instrument, not resent: {failure}"),
        FailureKind::Empty => warn!("{}: nothing received", failure.opcode),
        FailureKind::Garbled | FailureKind::PartialPayload { .. } => {
            warn!("reading error: {failure}")
        }
    }
}
