use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rk::Console;

/// Console over the process stdin and stdout.
///
/// A background thread moves stdin bytes into a buffer so that
/// [`Console::read`] never blocks the dispatcher.
pub struct StdConsole {
    input: Mutex<VecDeque<u8>>,
    arrived: AtomicBool,
    closed: AtomicBool,
}

impl StdConsole {
    /// Starts reading the process stdin.
    pub fn spawn() -> io::Result<Arc<Self>> {
        Self::from_reader(io::stdin())
    }

    /// Starts reading `reader` on a background thread.
    pub fn from_reader<R: Read + Send + 'static>(mut reader: R) -> io::Result<Arc<Self>> {
        let console = Arc::new(Self {
            input: Mutex::new(VecDeque::new()),
            arrived: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        let feeder = Arc::clone(&console);
        thread::Builder::new()
            .name("rk-console".into())
            .spawn(move || {
                let mut buf = [0u8; 256];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(len) => {
                            feeder.input.lock().extend(&buf[..len]);
                            feeder.arrived.store(true, Ordering::Release);
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            log::warn!("console input failed: {err}");
                            break;
                        }
                    }
                }
                log::debug!("console input closed");
                feeder.closed.store(true, Ordering::Release);
            })?;
        Ok(console)
    }

    /// Returns `true` once per burst of new input.
    pub fn take_arrival(&self) -> bool {
        self.arrived.swap(false, Ordering::AcqRel)
    }

    /// Bytes buffered and not yet read.
    pub fn pending(&self) -> usize {
        self.input.lock().len()
    }

    /// The input stream reached its end or failed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Console for StdConsole {
    fn read(&self, buf: &mut [u8]) -> usize {
        let mut input = self.input.lock();
        let count = buf.len().min(input.len());
        for (slot, byte) in buf.iter_mut().zip(input.drain(..count)) {
            *slot = byte;
        }
        count
    }

    fn write(&self, bytes: &[u8]) {
        let mut out = io::stdout().lock();
        if let Err(err) = out.write_all(bytes).and_then(|()| out.flush()) {
            log::warn!("console output failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn buffers_reader_input_until_read() {
        let console = StdConsole::from_reader(Cursor::new(b"status\n".to_vec())).unwrap();
        wait_until(|| console.is_closed());

        assert!(console.take_arrival());
        assert!(!console.take_arrival());
        assert_eq!(console.pending(), 7);

        let mut buf = [0u8; 4];
        assert_eq!(console.read(&mut buf), 4);
        assert_eq!(&buf, b"stat");
        assert_eq!(console.read(&mut buf), 3);
        assert_eq!(console.read(&mut buf), 0);
    }

    #[test]
    fn empty_input_never_signals_arrival() {
        let console = StdConsole::from_reader(io::empty()).unwrap();
        wait_until(|| console.is_closed());
        assert!(!console.take_arrival());
        assert_eq!(console.read(&mut [0u8; 8]), 0);
    }
}
