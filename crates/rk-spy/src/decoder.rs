use std::fmt;

use thiserror::Error;

use crate::payload::{FMT_I32, FMT_STR, FMT_U16, FMT_U32, FMT_U64, FMT_U8};
use crate::records::TIMESTAMP_MARK;
use crate::{ESC, ESC_XOR, FLAG};

/// A fully decoded trace frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpyFrame {
    /// Sequence counter maintained by the emitter.
    pub seq: u8,
    /// Record identifier with the timestamp mark stripped.
    pub record_type: u8,
    /// Emitter timestamp in microseconds, when the record carried one.
    pub timestamp_us: Option<u32>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// One typed field of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    U64(u64),
    Str(String),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// Errors produced while decoding HDLC frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short (len={0})")]
    FrameTooShort(usize),
    #[error("checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    InvalidChecksum { expected: u8, found: u8 },
    #[error("unknown field format {format:#04x} at offset {offset}")]
    UnknownFormat { format: u8, offset: usize },
    #[error("field truncated at offset {0}")]
    Truncated(usize),
}

impl SpyFrame {
    /// Parses the self-describing payload into typed fields.
    pub fn fields(&self) -> Result<Vec<Field>, DecodeError> {
        let data = &self.payload;
        let mut fields = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let format = data[pos];
            let start = pos + 1;
            let take = |len: usize| field_bytes(data, start, len, pos);
            let (field, len) = match format {
                FMT_U8 => (Field::U8(take(1)?[0]), 1),
                FMT_U16 => {
                    let raw = take(2)?;
                    (Field::U16(u16::from_le_bytes([raw[0], raw[1]])), 2)
                }
                FMT_U32 => {
                    let raw = take(4)?;
                    (Field::U32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])), 4)
                }
                FMT_I32 => {
                    let raw = take(4)?;
                    (Field::I32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])), 4)
                }
                FMT_U64 => {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(take(8)?);
                    (Field::U64(u64::from_le_bytes(raw)), 8)
                }
                FMT_STR => {
                    let rest = &data[start..];
                    let end = rest
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or(DecodeError::Truncated(pos))?;
                    let text = String::from_utf8_lossy(&rest[..end]).into_owned();
                    (Field::Str(text), end + 1)
                }
                other => {
                    return Err(DecodeError::UnknownFormat {
                        format: other,
                        offset: pos,
                    })
                }
            };
            fields.push(field);
            pos = start + len;
        }

        Ok(fields)
    }
}

fn field_bytes(data: &[u8], start: usize, len: usize, pos: usize) -> Result<&[u8], DecodeError> {
    data.get(start..start + len)
        .ok_or(DecodeError::Truncated(pos))
}

/// Incremental HDLC decoder that accepts arbitrary byte chunks and yields
/// verified frames.
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: Vec<u8>,
    escape_next: bool,
    dropped: u64,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any partial frame state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escape_next = false;
    }

    /// Feeds raw bytes into the decoder and returns any complete frames that
    /// were assembled. Stops at the first corrupt frame.
    pub fn push_bytes(&mut self, input: &[u8]) -> Result<Vec<SpyFrame>, DecodeError> {
        let mut frames = Vec::new();
        for &byte in input {
            if let Some(raw) = self.accept(byte) {
                frames.push(Self::decode_frame(&raw)?);
            }
        }
        Ok(frames)
    }

    /// Like [`push_bytes`](Self::push_bytes) but drops corrupt frames and
    /// keeps going.
    pub fn push_bytes_lossy(&mut self, input: &[u8]) -> Vec<SpyFrame> {
        let mut frames = Vec::new();
        for &byte in input {
            if let Some(raw) = self.accept(byte) {
                match Self::decode_frame(&raw) {
                    Ok(frame) => frames.push(frame),
                    Err(_) => self.dropped += 1,
                }
            }
        }
        frames
    }

    /// Frames discarded by [`push_bytes_lossy`](Self::push_bytes_lossy).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn accept(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == FLAG {
            self.escape_next = false;
            if self.buffer.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.buffer));
        }

        if self.escape_next {
            self.buffer.push(byte ^ ESC_XOR);
            self.escape_next = false;
        } else if byte == ESC {
            self.escape_next = true;
        } else {
            self.buffer.push(byte);
        }
        None
    }

    fn decode_frame(data: &[u8]) -> Result<SpyFrame, DecodeError> {
        if data.len() < 3 {
            return Err(DecodeError::FrameTooShort(data.len()));
        }

        let body = &data[..data.len() - 1];
        let checksum = data[data.len() - 1];

        let sum = body.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
        let expected = !sum;
        if checksum != expected {
            return Err(DecodeError::InvalidChecksum {
                expected,
                found: checksum,
            });
        }

        let seq = body[0];
        let record_byte = body[1];
        let mut rest = &body[2..];

        let timestamp_us = if record_byte & TIMESTAMP_MARK != 0 {
            if rest.len() < 4 {
                return Err(DecodeError::FrameTooShort(data.len()));
            }
            let ts = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            rest = &rest[4..];
            Some(ts)
        } else {
            None
        };

        Ok(SpyFrame {
            seq,
            record_type: record_byte & !TIMESTAMP_MARK,
            timestamp_us,
            payload: rest.to_vec(),
        })
    }
}
