//! POSIX-specific utilities for hosting an rk system.
//!
//! [`PosixPort`] bundles what a host process needs around a [`rk::Kernel`]: a
//! trace backend, a monotonic clock for periodic sources and a stdin/stdout
//! console. [`PosixRuntime`] drives the kernel until Ctrl-C.

use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use parking_lot::Mutex;

use rk::{Console, SystemBuilder, TraceError, TraceHook};
use rk_spy::{
    stdout_backend, SpyConfig, TcpBackend, TraceBackend, Tracer, TracerHandle, UdpBackend,
    WriterBackend,
};

mod clock;
mod console;
mod runtime;

pub use clock::MonotonicClock;
pub use console::StdConsole;
pub use runtime::{PosixRuntime, StopHandle};

enum BackendHandle {
    Stdout(TracerHandle<WriterBackend<std::io::Stdout>>),
    Tcp(TracerHandle<TcpBackend>),
    Udp(TracerHandle<UdpBackend>),
}

/// Host services for one rk system: tracing, clock and console.
pub struct PosixPort {
    backend: BackendHandle,
    clock: Arc<MonotonicClock>,
    console: Mutex<Option<Arc<StdConsole>>>,
}

impl PosixPort {
    /// Creates a port that streams trace records to stdout.
    pub fn new() -> Self {
        let handle = Tracer::new(SpyConfig::default(), stdout_backend()).into_handle();
        Self::with_backend(BackendHandle::Stdout(handle))
    }

    /// Connects to a remote rkspy listener over TCP.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let backend = TcpBackend::connect(addr)?;
        let handle = Tracer::new(SpyConfig::default(), backend).into_handle();
        Ok(Self::with_backend(BackendHandle::Tcp(handle)))
    }

    /// Connects to a remote rkspy listener over UDP.
    pub fn connect_udp<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let backend = UdpBackend::connect(addr)?;
        let handle = Tracer::new(SpyConfig::default(), backend).into_handle();
        Ok(Self::with_backend(BackendHandle::Udp(handle)))
    }

    fn with_backend(backend: BackendHandle) -> Self {
        Self {
            backend,
            clock: Arc::new(MonotonicClock::new()),
            console: Mutex::new(None),
        }
    }

    /// Returns the trace hook to be passed into the system builder.
    pub fn trace_hook(&self) -> TraceHook {
        match &self.backend {
            BackendHandle::Stdout(handle) => handle.hook(),
            BackendHandle::Tcp(handle) => handle.hook(),
            BackendHandle::Udp(handle) => handle.hook(),
        }
    }

    /// Emits an application-defined record on the same stream as the kernel.
    pub fn emit_record(
        &self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<(), TraceError> {
        match &self.backend {
            BackendHandle::Stdout(handle) => emit(handle, record_type, payload, with_timestamp),
            BackendHandle::Tcp(handle) => emit(handle, record_type, payload, with_timestamp),
            BackendHandle::Udp(handle) => emit(handle, record_type, payload, with_timestamp),
        }
    }

    /// Clock shared with the kernel. Kernel time counts from
    /// [`Kernel::start`](rk::Kernel::start), not from this reading.
    pub fn clock(&self) -> Arc<MonotonicClock> {
        Arc::clone(&self.clock)
    }

    /// Console on the process stdin/stdout. The stdin reader thread starts on
    /// first use.
    pub fn console(&self) -> io::Result<Arc<StdConsole>> {
        self.console_or_init(StdConsole::spawn)
    }

    // The lock is held across `spawn` so only one reader thread is started.
    fn console_or_init(
        &self,
        spawn: impl FnOnce() -> io::Result<Arc<StdConsole>>,
    ) -> io::Result<Arc<StdConsole>> {
        let mut slot = self.console.lock();
        if let Some(console) = slot.as_ref() {
            return Ok(Arc::clone(console));
        }
        let console = spawn()?;
        *slot = Some(Arc::clone(&console));
        Ok(console)
    }

    /// Installs the trace hook and the monotonic clock on `builder`.
    pub fn configure(&self, builder: SystemBuilder) -> SystemBuilder {
        builder
            .with_trace_hook(self.trace_hook())
            .with_clock(self.clock())
    }

    /// Like [`configure`](Self::configure), and also declares the console as
    /// the capability `name`.
    pub fn configure_with_console(
        &self,
        builder: SystemBuilder,
        name: &str,
    ) -> io::Result<SystemBuilder> {
        let console: Arc<dyn Console> = self.console()?;
        Ok(self.configure(builder).capability::<dyn Console>(name, console))
    }
}

fn emit<B: TraceBackend + 'static>(
    handle: &TracerHandle<B>,
    record_type: u8,
    payload: &[u8],
    with_timestamp: bool,
) -> Result<(), TraceError> {
    let record = if with_timestamp {
        handle.emit_with_timestamp(record_type, payload)
    } else {
        handle.emit(record_type, payload)
    };
    record.map(|_| ())
}

impl Default for PosixPort {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rk::{ComponentSpec, Kernel, KernelConfig, Priority, Status};
    use rk_spy::{records, Decoder};

    fn listener() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind listener");
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set timeout");
        socket
    }

    fn build(port: &PosixPort) -> Kernel {
        port.configure(SystemBuilder::new(KernelConfig::default()))
            .interrupt("irq")
            .register(
                ComponentSpec::task("worker", Priority(1), |_| Ok(())).on_interrupt(
                    "irq",
                    |_, _, _| Status::Success,
                ),
            )
            .build()
            .expect("system builds")
    }

    #[test]
    fn concurrent_console_requests_share_one_reader() {
        let port = PosixPort::new();
        let spawned = AtomicUsize::new(0);
        let spawn = || {
            spawned.fetch_add(1, Ordering::SeqCst);
            // Widen the window between the check and the store.
            std::thread::sleep(Duration::from_millis(20));
            StdConsole::from_reader(io::empty())
        };

        let (first, second) = std::thread::scope(|scope| {
            let a = scope.spawn(|| port.console_or_init(spawn));
            let b = scope.spawn(|| port.console_or_init(spawn));
            (a.join().unwrap(), b.join().unwrap())
        });

        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    }

    #[test]
    fn udp_port_streams_kernel_records() {
        let socket = listener();
        let port = PosixPort::connect_udp(socket.local_addr().unwrap()).expect("connect");
        let kernel = build(&port);

        kernel.start();

        let mut decoder = Decoder::new();
        let mut kinds = Vec::new();
        let mut buf = [0u8; 256];
        while !kinds.contains(&records::info::STARTED) {
            let len = socket.recv(&mut buf).expect("datagram");
            let frames = decoder.push_bytes(&buf[..len]).expect("valid frame");
            kinds.extend(frames.iter().map(|frame| frame.record_type));
        }
        assert_eq!(kinds[0], records::info::OBJ_DICT);
    }

    #[test]
    fn application_records_share_the_stream() {
        let socket = listener();
        let port = PosixPort::connect_udp(socket.local_addr().unwrap()).expect("connect");

        port.emit_record(100, &[1, 2, 3], false).unwrap();

        let mut buf = [0u8; 64];
        let len = socket.recv(&mut buf).unwrap();
        let frames = Decoder::new().push_bytes(&buf[..len]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].record_type, 100);
        assert_eq!(frames[0].payload, vec![1, 2, 3]);
    }

    #[test]
    fn configured_kernel_uses_the_monotonic_clock() {
        let socket = listener();
        let port = PosixPort::connect_udp(socket.local_addr().unwrap()).unwrap();
        let kernel = build(&port);

        let first = kernel.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(kernel.now() > first);
    }
}
