//! Host driver loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rk::{Kernel, KernelError};

use crate::console::StdConsole;

/// Clears the running flag of a [`PosixRuntime`] from anywhere.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Polls periodic sources and dispatches until stopped.
pub struct PosixRuntime {
    kernel: Arc<Kernel>,
    tick: Duration,
    running: Arc<AtomicBool>,
    console: Option<(Arc<StdConsole>, String)>,
}

impl PosixRuntime {
    /// `tick` is how long the loop sleeps once the kernel is idle.
    pub fn new(kernel: Arc<Kernel>, tick: Duration) -> Self {
        Self {
            kernel,
            tick,
            running: Arc::new(AtomicBool::new(false)),
            console: None,
        }
    }

    /// Raises the interrupt source `source` whenever console input arrives.
    pub fn with_console_interrupt(
        mut self,
        console: Arc<StdConsole>,
        source: impl Into<String>,
    ) -> Result<Self, KernelError> {
        let source = source.into();
        if self.kernel.source_id(&source).is_none() {
            return Err(KernelError::UnknownSource(source));
        }
        self.console = Some((console, source));
        Ok(self)
    }

    pub fn kernel(&self) -> Arc<Kernel> {
        Arc::clone(&self.kernel)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Stops the loop on SIGINT. A process may install this only once.
    pub fn stop_on_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let handle = self.stop_handle();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, stopping");
            handle.stop();
        })
    }

    /// One pass of the loop: input, ticks, then dispatch until idle.
    /// Returns the number of task actions run.
    pub fn step(&self) -> usize {
        if let Some((console, source)) = &self.console {
            if console.take_arrival() {
                // The source was checked when it was attached.
                let _ = self.kernel.raise(source, console.pending() as u32);
            }
        }
        self.kernel.poll_sources();
        self.kernel.run_until_idle()
    }

    /// Starts the kernel and loops until a [`StopHandle`] or Ctrl-C stops it.
    pub fn run(&self) -> u64 {
        self.running.store(true, Ordering::SeqCst);
        self.kernel.start();
        log::info!("runtime started, tick {:?}", self.tick);

        let mut actions = 0u64;
        while self.running.load(Ordering::Relaxed) {
            actions += self.step() as u64;
            thread::sleep(self.tick);
        }

        log::info!("runtime stopped after {actions} actions");
        actions
    }
}
