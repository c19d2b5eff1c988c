//! Console capability consumed by resources and handlers.
//!
//! The kernel never touches the host console itself. A [`Console`] is
//! declared as a capability provider and injected through a port.

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::sync::Mutex;

/// Synchronous byte console.
pub trait Console: Send + Sync {
    /// Reads up to `buf.len()` bytes that are already available. Returns the
    /// number of bytes copied, `0` when nothing is pending.
    fn read(&self, buf: &mut [u8]) -> usize;

    fn write(&self, bytes: &[u8]);

    fn write_str(&self, text: &str) {
        self.write(text.as_bytes());
    }

    fn write_u32(&self, value: u32) {
        self.write_fmt_value(format_args!("{value}"));
    }

    fn write_i32(&self, value: i32) {
        self.write_fmt_value(format_args!("{value}"));
    }

    fn write_f32(&self, value: f32) {
        self.write_fmt_value(format_args!("{value:.3}"));
    }

    #[doc(hidden)]
    fn write_fmt_value(&self, args: core::fmt::Arguments<'_>) {
        let mut text = String::with_capacity(16);
        let _ = text.write_fmt(args);
        self.write(text.as_bytes());
    }
}

/// In-memory console: scripted input, captured output.
#[derive(Default)]
pub struct BufferConsole {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for later [`Console::read`] calls.
    pub fn feed(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    /// Everything written so far.
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }

    pub fn clear_output(&self) {
        self.output.lock().clear();
    }
}

impl Console for BufferConsole {
    fn read(&self, buf: &mut [u8]) -> usize {
        let mut input = self.input.lock();
        let count = buf.len().min(input.len());
        for (slot, byte) in buf.iter_mut().zip(input.drain(..count)) {
            *slot = byte;
        }
        count
    }

    fn write(&self, bytes: &[u8]) {
        self.output.lock().extend_from_slice(bytes);
    }
}
