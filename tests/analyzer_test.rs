mod common;

use anyhow::Result;
use common::{ack, nak, ScriptedInstrument};
use nox_logger::frame::ACK;
use nox_logger::response::FieldValue;
use nox_logger::{
    encode, ConcentrationTriplet, DecodedReading, DriverError, FailureKind, NoxAnalyzer, Opcode,
    TransportReader,
};

fn analyzer(line: &ScriptedInstrument, verify_bcc: bool) -> NoxAnalyzer {
    NoxAnalyzer::from_transport(line.boxed(), 1, verify_bcc)
        .with_reader(TransportReader::immediate())
}

#[test]
fn test_reads_concentrations_in_ppb() -> Result<()> {
    let line = ScriptedInstrument::healthy();
    let mut nox = analyzer(&line, false);

    let reading = nox.read_concentrations()?;
    assert_eq!(
        reading,
        DecodedReading::Concentrations(ConcentrationTriplet {
            no: 12,
            no2: 20,
            nox: 32
        })
    );
    assert_eq!(line.sent(), vec!["RD3"]);
    Ok(())
}

#[test]
fn test_echoed_opcode_in_reply() -> Result<()> {
    let line = ScriptedInstrument::default();
    line.reply_always("RD3", ack(b"RD3 1.000, 2.000, 3.000"));
    let mut nox = analyzer(&line, false);

    match nox.read_concentrations()? {
        DecodedReading::Concentrations(c) => {
            assert_eq!((c.no, c.no2, c.nox), (1000, 2000, 3000));
        }
        other => panic!("expected concentrations, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_nak_is_reported_and_not_resent() -> Result<()> {
    let line = ScriptedInstrument::healthy();
    line.reply_once("RD3", nak());
    let mut nox = analyzer(&line, false);

    match nox.read_concentrations()? {
        DecodedReading::Failure(failure) => {
            assert_eq!(failure.opcode, Opcode::Rd3);
            assert_eq!(failure.kind, FailureKind::Nak);
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    assert_eq!(line.sent(), vec!["RD3"]);

    // The next read goes through normally.
    assert!(!nox.read_concentrations()?.is_failure());
    Ok(())
}

#[test]
fn test_silent_instrument_is_an_empty_read() -> Result<()> {
    let line = ScriptedInstrument::default();
    let mut nox = analyzer(&line, false);

    match nox.read_concentrations()? {
        DecodedReading::Failure(failure) => assert_eq!(failure.kind, FailureKind::Empty),
        other => panic!("expected a failure, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_stale_input_is_discarded_before_sending() -> Result<()> {
    let line = ScriptedInstrument::healthy();
    line.inject(&[ACK, b'0', b'1', b'9', b'9', b'9']);
    let mut nox = analyzer(&line, false);

    assert_eq!(
        nox.read_concentrations()?,
        DecodedReading::Concentrations(ConcentrationTriplet {
            no: 12,
            no2: 20,
            nox: 32
        })
    );
    Ok(())
}

#[test]
fn test_bcc_checked_only_when_enabled() -> Result<()> {
    let mut reply = ack(b"0.012, 0.020, 0.032");
    if let Some(bcc) = reply.last_mut() {
        *bcc ^= 0xFF;
    }

    let line = ScriptedInstrument::default();
    line.reply_always("RD3", reply.clone());
    assert!(!analyzer(&line, false).read_concentrations()?.is_failure());

    let line = ScriptedInstrument::default();
    line.reply_always("RD3", reply);
    match analyzer(&line, true).read_concentrations()? {
        DecodedReading::Failure(failure) => assert_eq!(failure.kind, FailureKind::Garbled),
        other => panic!("expected a failure, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_instrument_status_sample() -> Result<()> {
    let line = ScriptedInstrument::healthy();
    let mut nox = analyzer(&line, false);

    let status = match nox.read_instrument_status()? {
        Ok(status) => status,
        Err(failure) => panic!("expected a status sample, got {failure}"),
    };
    assert!(!status.has_error());
    assert_eq!(status.status_byte_d, 0b1000_0001);
    assert_eq!(status.status_byte_s, 0b0000_0010);
    assert_eq!(status.error_code, "00");
    assert_eq!(status.sample_pressure_mbar, 1013);
    assert_eq!(status.reactor_pressure_mbar, 250);
    assert_eq!(status.instr_temp_c, 30);
    assert_eq!(status.converter_temp_c, 325);
    assert_eq!(status.flow_lpm, 0.8);
    assert_eq!(status.range, '2');

    assert_eq!(
        line.sent(),
        vec!["RS", "RP0", "RP1", "RT0", "RT1", "RT2", "RT3", "RF", "RR"]
    );
    Ok(())
}

#[test]
fn test_failed_parameter_read_fails_the_sample() -> Result<()> {
    let line = ScriptedInstrument::healthy();
    line.reply_once("RP1", nak());
    let mut nox = analyzer(&line, false);

    match nox.read_instrument_status()? {
        Err(failure) => {
            assert_eq!(failure.opcode, Opcode::Rp1);
            assert_eq!(failure.kind, FailureKind::Nak);
        }
        Ok(status) => panic!("expected a failure, got {status:?}"),
    }
    // Every parameter is still asked for.
    assert_eq!(line.sent().len(), Opcode::PARAMETER_READS.len());
    Ok(())
}

#[test]
fn test_probe_reports_frame_and_value() -> Result<()> {
    let line = ScriptedInstrument::healthy();
    let mut nox = analyzer(&line, false);

    let report = nox.probe(Opcode::Rf)?;
    assert_eq!(report.frame, encode(1, "RF"));
    assert_eq!(report.response.as_bytes(), ack(b"0.8").as_slice());
    assert_eq!(report.decoded, Ok(FieldValue::Flow(0.8)));
    Ok(())
}

#[test]
fn test_channel_fault_is_an_error() {
    let line = ScriptedInstrument::broken();
    let mut nox = analyzer(&line, false);

    assert!(matches!(nox.read_concentrations(), Err(DriverError::Io(_))));
}
