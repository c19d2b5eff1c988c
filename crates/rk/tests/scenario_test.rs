//! End-to-end systems built from every kind of provider.

use std::sync::Arc;
use std::time::Duration;

use rk::{
    BufferConsole, ComponentSpec, Console, Kernel, KernelConfig, PoolBox, PoolPort, Priority,
    Resource, Sender, Status, SystemBuilder,
};

const SLOTS: usize = 4;
const THRESHOLD: u32 = 5;

/// Aggregated parameter snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Report {
    values: Vec<u32>,
}

struct Housekeeping {
    params: Resource<Vec<u32>>,
    reports: Sender<Report>,
    refreshes: Resource<u32>,
    since_report: u32,
}

impl Housekeeping {
    fn on_tick(&mut self, seq: u64) -> Status {
        let slot = seq as usize % SLOTS;
        self.params.call(|values| values[slot] += 1);
        self.refreshes.call(|count| *count += 1);

        self.since_report += 1;
        if self.since_report < THRESHOLD {
            return Status::Success;
        }
        self.since_report = 0;
        let values = self.params.call(|values| values.clone());
        match self.reports.send(Report { values }) {
            Ok(()) => Status::Success,
            Err(_) => Status::Failure(1),
        }
    }
}

fn housekeeping_system(console: Arc<BufferConsole>) -> Kernel {
    SystemBuilder::new(KernelConfig::default())
        .resource("params", vec![0u32; SLOTS])
        .resource("refreshes", 0u32)
        .queue::<Report>("reports", 2)
        .periodic("hk_tick", Duration::from_millis(100))
        .capability::<dyn Console>("console", console)
        .register(
            ComponentSpec::task("housekeeping", Priority(3), |ports| {
                Ok(Housekeeping {
                    params: ports.resource("params")?,
                    reports: ports.sender("reports")?,
                    refreshes: ports.resource("refreshes")?,
                    since_report: 0,
                })
            })
            .on_tick("hk_tick", |hk, _, tick| hk.on_tick(tick.seq)),
        )
        .register(
            ComponentSpec::task("telemetry", Priority(1), |ports| {
                ports.capability::<dyn Console>("out")
            })
            .on_message("reports", |console, _, report: Report| {
                console.write_str("HK");
                for value in report.values {
                    console.write_str(" ");
                    console.write_u32(value);
                }
                console.write_str("\n");
                Status::Success
            }),
        )
        .connect("housekeeping", "params", "params")
        .connect("housekeeping", "refreshes", "refreshes")
        .connect("housekeeping", "reports", "reports")
        .connect("telemetry", "out", "console")
        .build()
        .unwrap()
}

#[test]
fn housekeeping_reports_once_per_threshold() {
    let console = Arc::new(BufferConsole::new());
    let kernel = housekeeping_system(console.clone());
    let refreshes = kernel.resource::<u32>("refreshes").unwrap();

    for period in 1..=4 {
        kernel.advance(Duration::from_millis(100 * period));
        kernel.run_until_idle();
    }
    assert_eq!(refreshes.call(|count| *count), 4);
    assert!(console.output().is_empty());

    kernel.advance(Duration::from_millis(500));
    kernel.run_until_idle();
    // Ticks 1..=5 touched slots 1, 2, 3, 0, 1.
    assert_eq!(console.output_string(), "HK 1 2 1 1\n");
    assert_eq!(refreshes.call(|count| *count), 5);

    for period in 6..=9 {
        kernel.advance(Duration::from_millis(100 * period));
        kernel.run_until_idle();
    }
    assert_eq!(refreshes.call(|count| *count), 9);
    assert_eq!(console.output_string().lines().count(), 1);

    kernel.advance(Duration::from_millis(1000));
    kernel.run_until_idle();
    assert_eq!(console.output_string().lines().count(), 2);
    assert_eq!(kernel.queue_stats("reports").unwrap().sent, 2);
    assert_eq!(kernel.component_stats("telemetry").unwrap().activations, 2);
}

/// Receive buffer for one burst of console input.
#[derive(Debug, Default)]
struct Frame {
    len: usize,
    bytes: [u8; 16],
}

struct Receiver {
    frames: PoolPort<Frame>,
    console: Arc<dyn Console>,
    out: Sender<PoolBox<Frame>>,
}

impl Receiver {
    fn on_input(&mut self) -> Status {
        let Some(mut frame) = self.frames.alloc() else {
            return Status::Failure(1);
        };
        frame.len = self.console.read(&mut frame.bytes);
        if frame.len == 0 {
            return Status::from(self.frames.free(frame).map_err(|_| -3));
        }
        match self.out.send(frame) {
            Ok(()) => Status::Success,
            Err(full) => {
                let _ = self.frames.free(full.into_inner());
                Status::Failure(2)
            }
        }
    }
}

fn uart_system(console: Arc<BufferConsole>) -> Kernel {
    SystemBuilder::new(KernelConfig::default())
        .pool::<Frame>("frames", 10)
        .queue::<PoolBox<Frame>>("rx_frames", 4)
        .interrupt("uart_rx")
        .capability::<dyn Console>("console", console)
        .register(
            ComponentSpec::handler("uart", |ports| {
                Ok(Receiver {
                    frames: ports.pool("frames")?,
                    console: ports.capability("console")?,
                    out: ports.sender("out")?,
                })
            })
            .on_interrupt("uart_rx", |rx, _, _| rx.on_input()),
        )
        .register(
            ComponentSpec::task("parser", Priority(2), |ports| {
                Ok((
                    ports.pool::<Frame>("frames")?,
                    ports.capability::<dyn Console>("echo")?,
                ))
            })
            .on_message("rx_frames", |(frames, echo), _, frame: PoolBox<Frame>| {
                echo.write(&frame.bytes[..frame.len]);
                Status::from(frames.free(frame).map_err(|_| -3))
            }),
        )
        .connect("uart", "frames", "frames")
        .connect("uart", "console", "console")
        .connect("uart", "out", "rx_frames")
        .connect("parser", "frames", "frames")
        .connect("parser", "echo", "console")
        .build()
        .unwrap()
}

#[test]
fn zero_byte_input_frees_its_block_without_sending() {
    let console = Arc::new(BufferConsole::new());
    let kernel = uart_system(console.clone());
    let before = kernel.pool_stats("frames").unwrap().in_use;

    kernel.raise("uart_rx", 0).unwrap();

    let queue = kernel.queue_stats("rx_frames").unwrap();
    assert_eq!(queue.len, 0);
    assert_eq!(queue.sent, 0);
    assert_eq!(kernel.pool_stats("frames").unwrap().in_use, before);
    let uart = kernel.component_stats("uart").unwrap();
    assert_eq!((uart.activations, uart.failures), (1, 0));
    assert!(!kernel.has_ready());
}

#[test]
fn received_bytes_travel_to_the_parser_in_a_pooled_block() {
    let console = Arc::new(BufferConsole::new());
    let kernel = uart_system(console.clone());

    console.feed(b"ping");
    kernel.raise("uart_rx", 0).unwrap();
    assert_eq!(kernel.queue_stats("rx_frames").unwrap().len, 1);
    assert_eq!(kernel.pool_stats("frames").unwrap().in_use, 1);

    assert_eq!(kernel.run_until_idle(), 1);
    assert_eq!(console.output_string(), "ping");
    assert_eq!(kernel.pool_stats("frames").unwrap().in_use, 0);
}

#[test]
fn exhausted_pool_fails_the_handler_and_recovers() {
    let console = Arc::new(BufferConsole::new());
    let kernel = uart_system(console.clone());
    let frames = kernel.pool::<Frame>("frames").unwrap();

    let mut held: Vec<PoolBox<Frame>> = (0..10).map(|_| frames.alloc().unwrap()).collect();
    assert_eq!(frames.outstanding(), 10);

    console.feed(b"x");
    kernel.raise("uart_rx", 0).unwrap();
    let uart = kernel.component_stats("uart").unwrap();
    assert_eq!(uart.failures, 1);
    assert_eq!(uart.last_failure, Some(1));
    assert_eq!(kernel.queue_stats("rx_frames").unwrap().len, 0);
    assert!(kernel.pool_stats("frames").unwrap().exhausted >= 1);

    // Dispatching carries on: release one block and retry.
    frames.free(held.pop().unwrap()).unwrap();
    kernel.raise("uart_rx", 0).unwrap();
    assert_eq!(kernel.run_until_idle(), 1);
    assert_eq!(console.output_string(), "x");

    for block in held {
        frames.free(block).unwrap();
    }
    assert_eq!(kernel.pool_stats("frames").unwrap().in_use, 0);
    assert_eq!(kernel.component_stats("uart").unwrap().activations, 2);
}
