//! Bounded queue behaviour seen through a built system.

use std::sync::{Arc, Mutex};
use std::thread;

use rk::{
    ComponentSpec, ConfigError, KernelConfig, PortError, Priority, QueuePolicy, SendError, Status,
    SystemBuilder,
};

type Inbox = Arc<Mutex<Vec<&'static str>>>;

fn system(capacity: usize, policy: QueuePolicy, inbox: Inbox) -> SystemBuilder {
    SystemBuilder::new(KernelConfig::default())
        .queue_with_policy::<&'static str>("inbox", capacity, policy)
        .register(
            ComponentSpec::task("reader", Priority(1), move |_| Ok(inbox)).on_message(
                "inbox",
                |inbox, _, item: &'static str| {
                    inbox.lock().unwrap().push(item);
                    Status::Success
                },
            ),
        )
}

#[test]
fn capacity_plus_one_send_returns_the_item() {
    let inbox = Inbox::default();
    let kernel = system(3, QueuePolicy::FailFast, inbox.clone()).build().unwrap();
    let tx = kernel.sender::<&'static str>("inbox").unwrap();

    for item in ["a", "b", "c"] {
        tx.send(item).unwrap();
    }
    match tx.send("d") {
        Err(SendError::Full(item)) => assert_eq!(item, "d"),
        other => panic!("expected a full queue, got {other:?}"),
    }
    assert_eq!(tx.len(), 3);

    kernel.run_until_idle();
    assert_eq!(*inbox.lock().unwrap(), vec!["a", "b", "c"]);

    let stats = kernel.queue_stats("inbox").unwrap();
    assert_eq!(stats.high_water, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.len, 0);
}

#[test]
fn items_arrive_in_send_order_across_dispatches() {
    let inbox = Inbox::default();
    let kernel = system(2, QueuePolicy::FailFast, inbox.clone()).build().unwrap();
    let tx = kernel.sender::<&'static str>("inbox").unwrap();

    tx.send("a").unwrap();
    tx.send("b").unwrap();
    assert!(kernel.dispatch_once());
    tx.send("c").unwrap();
    kernel.run_until_idle();

    assert_eq!(*inbox.lock().unwrap(), vec!["a", "b", "c"]);
}

#[test]
fn blocking_queue_waits_for_room() {
    let received: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let kernel = system(2, QueuePolicy::Block, received.clone()).build().unwrap();
    let tx = kernel.sender::<&'static str>("inbox").unwrap();
    let items = ["a", "b", "c", "d", "e", "f"];

    assert!(tx.send("warmup").is_ok());
    assert!(tx.send("warmup").is_ok());
    // A full blocking queue still refuses `try_send`.
    assert!(tx.try_send("x").is_err());
    kernel.run_until_idle();
    received.lock().unwrap().clear();

    thread::scope(|scope| {
        scope.spawn(|| {
            for item in items {
                tx.send(item).unwrap();
            }
        });
        while received.lock().unwrap().len() < items.len() {
            kernel.run_until_idle();
            thread::yield_now();
        }
    });

    assert_eq!(*received.lock().unwrap(), items);
    assert!(kernel.queue_stats("inbox").unwrap().high_water <= 2);
}

#[test]
fn blocking_queue_cannot_feed_a_component() {
    let inbox = Inbox::default();
    let err = system(2, QueuePolicy::Block, inbox)
        .interrupt("irq")
        .register(
            ComponentSpec::handler("isr", |ports| ports.sender::<&'static str>("out"))
                .on_interrupt("irq", |_, _, _| Status::Success),
        )
        .connect("isr", "out", "inbox")
        .build()
        .unwrap_err();

    assert_eq!(
        err,
        ConfigError::Port(PortError::BlockingProducer {
            component: "isr".into(),
            port: "out".into(),
            queue: "inbox".into(),
        })
    );
}

#[test]
fn external_sender_checks_item_type() {
    let kernel = system(2, QueuePolicy::FailFast, Inbox::default())
        .build()
        .unwrap();
    assert!(kernel.sender::<u32>("inbox").is_err());
    assert!(kernel.sender::<&'static str>("outbox").is_err());
}
