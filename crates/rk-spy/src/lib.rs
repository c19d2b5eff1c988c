//! Binary software tracing with pluggable backends.
//!
//! Trace *records* are small binary messages framed in HDLC packets: a
//! sequence number, a record id, an optional microsecond timestamp, a
//! self-describing payload and a one's-complement checksum. The kernel emits
//! records through a [`TraceHook`]; the [`Decoder`] turns a byte stream back
//! into [`SpyFrame`]s on the host side.

use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

mod decoder;
mod payload;

pub mod records;

pub use decoder::{DecodeError, Decoder, Field, SpyFrame};
pub use payload::{
    PayloadBuilder, FMT_I32, FMT_STR, FMT_U16, FMT_U32, FMT_U64, FMT_U8,
};

/// Maximum payload length for a single record (excluding header/checksum).
const DEFAULT_MAX_RECORD_LEN: usize = 64;

pub(crate) const FLAG: u8 = 0x7E;
pub(crate) const ESC: u8 = 0x7D;
pub(crate) const ESC_XOR: u8 = 0x20;

/// Configuration for the tracer.
#[derive(Debug, Clone)]
pub struct SpyConfig {
    pub max_record_len: usize,
    pub include_timestamp: bool,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            include_timestamp: true,
        }
    }
}

/// A single emitted record.
#[derive(Debug, Clone)]
pub struct SpyRecord {
    pub seq: u8,
    pub record_type: u8,
    pub timestamp: Option<Duration>,
    pub payload: Vec<u8>,
}

/// Errors that can occur while emitting trace data.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

/// Backend trait that consumes HDLC framed bytes.
pub trait TraceBackend: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError>;
}

/// Simple backend that writes frames to any `Write` implementation.
pub struct WriterBackend<W: Write + Send + 'static> {
    writer: Arc<Mutex<W>>,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

impl<W: Write + Send + 'static> TraceBackend for WriterBackend<W> {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(frame).map_err(TraceError::from)
    }
}

/// Backend that keeps every frame in memory. Cloning shares the buffer.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    frames: Arc<Mutex<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every byte written so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Decodes the captured stream. Corrupt frames are skipped.
    pub fn frames(&self) -> Vec<SpyFrame> {
        let mut decoder = Decoder::new();
        decoder.push_bytes_lossy(&self.bytes())
    }
}

impl TraceBackend for MemoryBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(frame);
        Ok(())
    }
}

/// Trace frame encoder.
#[derive(Debug)]
pub struct Tracer<B: TraceBackend> {
    backend: B,
    cfg: SpyConfig,
    seq: u8,
    epoch: Instant,
}

#[derive(Clone)]
pub struct TracerHandle<B: TraceBackend> {
    inner: Arc<Mutex<Tracer<B>>>,
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(cfg: SpyConfig, backend: B) -> Self {
        Self {
            backend,
            cfg,
            seq: 0,
            epoch: Instant::now(),
        }
    }

    pub fn into_handle(self) -> TracerHandle<B> {
        TracerHandle {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    pub fn record(
        &mut self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<SpyRecord, TraceError> {
        if payload.len() > self.cfg.max_record_len {
            return Err(TraceError::PayloadTooLarge(payload.len()));
        }

        let timestamp = if self.cfg.include_timestamp && with_timestamp {
            Some(self.epoch.elapsed())
        } else {
            None
        };

        self.seq = self.seq.wrapping_add(1);
        let record = SpyRecord {
            seq: self.seq,
            record_type,
            timestamp,
            payload: payload.to_vec(),
        };

        let frame = build_frame(&record);
        self.backend.write_frame(&frame)?;
        Ok(record)
    }
}

/// Encodes a record as an HDLC frame terminated by [`FLAG`].
///
/// A timestamped record carries a `0x80` marker in the high bit of the record
/// id so the decoder knows the next four bytes are the timestamp.
pub fn build_frame(record: &SpyRecord) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(record.payload.len() + 8);
    let mut checksum: u8 = 0;

    let push_escaped = |dest: &mut Vec<u8>, sum: &mut u8, byte: u8| {
        *sum = sum.wrapping_add(byte);
        push_literal(dest, byte);
    };

    let record_byte = if record.timestamp.is_some() {
        record.record_type | records::TIMESTAMP_MARK
    } else {
        record.record_type & !records::TIMESTAMP_MARK
    };

    push_escaped(&mut bytes, &mut checksum, record.seq);
    push_escaped(&mut bytes, &mut checksum, record_byte);

    if let Some(ts) = record.timestamp {
        let ticks = (ts.as_micros() as u32).to_le_bytes();
        for byte in ticks {
            push_escaped(&mut bytes, &mut checksum, byte);
        }
    }

    for &byte in &record.payload {
        push_escaped(&mut bytes, &mut checksum, byte);
    }

    push_literal(&mut bytes, !checksum);
    bytes.push(FLAG);
    bytes
}

fn push_literal(dest: &mut Vec<u8>, byte: u8) {
    if byte == FLAG || byte == ESC {
        dest.push(ESC);
        dest.push(byte ^ ESC_XOR);
    } else {
        dest.push(byte);
    }
}

impl<B: TraceBackend + 'static> TracerHandle<B> {
    pub fn emit(&self, record_type: u8, payload: &[u8]) -> Result<SpyRecord, TraceError> {
        self.emit_internal(record_type, payload, false)
    }

    pub fn emit_with_timestamp(
        &self,
        record_type: u8,
        payload: &[u8],
    ) -> Result<SpyRecord, TraceError> {
        self.emit_internal(record_type, payload, true)
    }

    fn emit_internal(
        &self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<SpyRecord, TraceError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.record(record_type, payload, with_timestamp)
    }

    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |record_type, payload, with_timestamp| {
            let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .record(record_type, payload, with_timestamp)
                .map(|_| ())
        })
    }
}

pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> Result<(), TraceError> + Send + Sync>;

/// Convenience backend that writes frames to stdout; handy for early bring-up.
pub fn stdout_backend() -> WriterBackend<io::Stdout> {
    WriterBackend::new(io::stdout())
}

/// Backend that streams frames over a TCP connection.
pub struct TcpBackend {
    stream: Arc<Mutex<TcpStream>>,
}

impl TcpBackend {
    /// Establishes a TCP connection to the provided socket address.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream: Arc::new(Mutex::new(stream)),
        })
    }
}

impl TraceBackend for TcpBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(frame).map_err(TraceError::from)
    }
}

/// Backend that streams frames over a UDP socket.
pub struct UdpBackend {
    socket: Arc<Mutex<UdpSocket>>,
}

impl UdpBackend {
    /// Binds a local UDP socket and connects it to the provided remote address.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        Ok(Self {
            socket: Arc::new(Mutex::new(socket)),
        })
    }
}

impl TraceBackend for UdpBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        let guard = self.socket.lock().unwrap_or_else(|e| e.into_inner());
        guard.send(frame).map(|_| ()).map_err(TraceError::from)
    }
}
