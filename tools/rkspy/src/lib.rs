//! Host-side utilities for reading rk-spy trace streams.
//!
//! Frames arrive HDLC-framed from a file, stdin or a UDP socket. The
//! [`FrameInterpreter`] turns them into text using the component dictionary
//! the kernel emits at start, and the [`RecordFormatter`] prints them.

mod formatter;
mod interpreter;

pub use formatter::RecordFormatter;
pub use interpreter::{FrameInterpreter, Line, RecordGroup};

use chrono::Local;
use rk_spy::Decoder;

/// Decoder, interpreter and formatter chained together.
pub struct Session {
    decoder: Decoder,
    interpreter: FrameInterpreter,
    formatter: RecordFormatter,
}

impl Session {
    pub fn new(formatter: RecordFormatter) -> Self {
        Self {
            decoder: Decoder::new(),
            interpreter: FrameInterpreter::new(),
            formatter,
        }
    }

    /// Feeds raw bytes and returns the formatted output lines. Corrupt frames
    /// are skipped and counted.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let received = Local::now();
        self.decoder
            .push_bytes_lossy(bytes)
            .iter()
            .filter_map(|frame| {
                let line = self.interpreter.interpret(frame);
                self.formatter.format(&line, received)
            })
            .collect()
    }

    /// Frames dropped for a bad checksum or length.
    pub fn corrupt_frames(&self) -> u64 {
        self.decoder.dropped()
    }
}
