//! In-memory device log served by `/log.json`.
//!
//! The buffer keeps the most recent bytes written to the process log.
//! Positions are absolute: position `n` is the n-th byte ever written, so a
//! client can poll with the last position it saw.

use log::{Log, Metadata, Record};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

/// Upper bound of text returned by a single excerpt.
pub const MAX_EXCERPT_BYTES: usize = 512;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogExcerpt {
    /// Absolute position of the first returned byte
    pub start: u64,
    pub text: String,
}

pub trait LogProvider: Send + Sync {
    /// Text starting at `position`, clamped to the oldest retained byte
    fn get_log(&self, position: u64) -> LogExcerpt;
    /// Total number of bytes written so far
    fn position(&self) -> u64;
}

struct Ring {
    bytes: VecDeque<u8>,
    capacity: usize,
    end: u64,
}

#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<Ring>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ring {
                bytes: VecDeque::with_capacity(capacity),
                capacity,
                end: 0,
            })),
        }
    }

    pub fn append(&self, text: &str) {
        let mut ring = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        for byte in text.bytes() {
            if ring.bytes.len() == ring.capacity {
                ring.bytes.pop_front();
            }
            if ring.capacity > 0 {
                ring.bytes.push_back(byte);
            }
        }
        ring.end += text.len() as u64;
    }
}

impl LogProvider for LogBuffer {
    fn get_log(&self, position: u64) -> LogExcerpt {
        let ring = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let oldest = ring.end - ring.bytes.len() as u64;

        if position >= ring.end {
            return LogExcerpt {
                start: position,
                text: String::new(),
            };
        }

        let mut start = position.max(oldest);
        let offset = (start - oldest) as usize;
        let mut bytes: Vec<u8> = ring
            .bytes
            .iter()
            .skip(offset)
            .take(MAX_EXCERPT_BYTES)
            .copied()
            .collect();

        // excerpts begin and end on character boundaries
        let partial = bytes.iter().take_while(|b| is_continuation(**b)).count();
        bytes.drain(..partial);
        start += partial as u64;
        if let Err(e) = std::str::from_utf8(&bytes) {
            if e.error_len().is_none() {
                bytes.truncate(e.valid_up_to());
            }
        }

        LogExcerpt {
            start,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    fn position(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .end
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

/// Logger writing every record it lets through into a [`LogBuffer`] as well
pub struct BufferedLogger<L> {
    inner: L,
    buffer: LogBuffer,
}

impl<L: Log> BufferedLogger<L> {
    pub fn new(inner: L, buffer: LogBuffer) -> Self {
        Self { inner, buffer }
    }
}

impl<L: Log> Log for BufferedLogger<L> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.inner.enabled(record.metadata()) {
            self.buffer.append(&format!("{}\n", record.args()));
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
