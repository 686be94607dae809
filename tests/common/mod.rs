#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use nox_logger::frame::{ACK, ETX, NAK};
use nox_logger::{compute_bcc, Clock, Frame, Transport};

/// `ACK 0 1 <payload> ETX BCC`
pub fn ack(payload: &[u8]) -> Vec<u8> {
    let mut v = vec![ACK, b'0', b'1'];
    v.extend_from_slice(payload);
    v.push(ETX);
    v.push(compute_bcc(&v));
    v
}

pub fn nak() -> Vec<u8> {
    vec![NAK, b'0', b'1']
}

pub fn status_reply() -> Vec<u8> {
    let mut v = vec![
        ACK,
        0x40,
        b'0',
        0b1000_0001,
        0b0000_0010,
        b' ',
        b'0',
        b'0',
        b' ',
        b'0',
        b'0',
        ETX,
    ];
    v.push(compute_bcc(&v));
    v
}

#[derive(Default)]
struct Line {
    tx: Vec<u8>,
    rx: VecDeque<u8>,
    sent: Vec<String>,
    queued: HashMap<String, VecDeque<Vec<u8>>>,
    defaults: HashMap<String, Vec<u8>>,
    broken: bool,
}

/// An in-memory analyzer: answers each complete request frame from a script.
#[derive(Clone, Default)]
pub struct ScriptedInstrument {
    line: Arc<Mutex<Line>>,
}

impl ScriptedInstrument {
    /// Replies of a healthy instrument to every opcode.
    pub fn healthy() -> Self {
        let s = Self::default();
        s.reply_always("RD3", ack(b"0.012, 0.020, 0.032"));
        s.reply_always("RS", status_reply());
        s.reply_always("RP0", ack(b"1013"));
        s.reply_always("RP1", ack(b"0250"));
        s.reply_always("RT0", ack(b"030"));
        s.reply_always("RT1", ack(b"010"));
        s.reply_always("RT2", ack(b"050"));
        s.reply_always("RT3", ack(b"325"));
        s.reply_always("RF", ack(b"0.8"));
        s.reply_always("RR", ack(b"2"));
        s
    }

    /// Every read and write fails, as with an unplugged adapter.
    pub fn broken() -> Self {
        let s = Self::default();
        s.line.lock().unwrap().broken = true;
        s
    }

    pub fn reply_always(&self, opcode: &str, reply: Vec<u8>) {
        self.line
            .lock()
            .unwrap()
            .defaults
            .insert(opcode.to_string(), reply);
    }

    /// Queue a one-off reply, used before the default.
    pub fn reply_once(&self, opcode: &str, reply: Vec<u8>) {
        self.line
            .lock()
            .unwrap()
            .queued
            .entry(opcode.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Put bytes on the line that nobody asked for.
    pub fn inject(&self, bytes: &[u8]) {
        self.line.lock().unwrap().rx.extend(bytes);
    }

    /// Opcodes of every frame received so far.
    pub fn sent(&self) -> Vec<String> {
        self.line.lock().unwrap().sent.clone()
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "adapter unplugged")
}

impl Read for ScriptedInstrument {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut line = self.line.lock().unwrap();
        if line.broken {
            return Err(broken_pipe());
        }
        let n = buf.len().min(line.rx.len());
        for (slot, byte) in buf.iter_mut().zip(line.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedInstrument {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut line = self.line.lock().unwrap();
        if line.broken {
            return Err(broken_pipe());
        }
        line.tx.extend_from_slice(buf);

        // A frame is complete once ETX is followed by the BCC byte.
        if let Some(etx) = line.tx.iter().position(|&b| b == ETX) {
            if line.tx.len() > etx + 1 {
                let frame: Vec<u8> = line.tx.drain(..etx + 2).collect();
                if let Ok((_, opcode)) = Frame::parse(&frame) {
                    let reply = line
                        .queued
                        .get_mut(&opcode)
                        .and_then(|q| q.pop_front())
                        .or_else(|| line.defaults.get(&opcode).cloned());
                    if let Some(reply) = reply {
                        line.rx.extend(reply);
                    }
                    line.sent.push(opcode);
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedInstrument {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let line = self.line.lock().unwrap();
        if line.broken {
            return Err(broken_pipe());
        }
        Ok(line.rx.len())
    }
}

/// A clock that only moves when slept on, and clears `running` at `stop_at`.
pub struct FakeClock {
    now: Cell<DateTime<Local>>,
    stop_at: DateTime<Local>,
    running: Arc<AtomicBool>,
    jump: Cell<Option<chrono::Duration>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Local>, stop_at: DateTime<Local>, running: Arc<AtomicBool>) -> Self {
        Self {
            now: Cell::new(start),
            stop_at,
            running,
            jump: Cell::new(None),
        }
    }

    /// Step the clock forward by `by` on the first sleep, as after a suspend.
    pub fn jump_on_first_sleep(self, by: chrono::Duration) -> Self {
        self.jump.set(Some(by));
        self
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Local> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or_default();
        let next = self.now.get() + step + self.jump.take().unwrap_or_default();
        self.now.set(next);
        if next >= self.stop_at {
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

pub fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(y, mo, d, h, mi, s)
        .earliest()
        .unwrap()
}
