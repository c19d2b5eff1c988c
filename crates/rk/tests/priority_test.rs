//! Priority order, arrival order and run-to-completion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rk::{ComponentSpec, Kernel, KernelConfig, Priority, Status, SystemBuilder};

type Trail = Arc<Mutex<Vec<String>>>;

fn logged_task(name: &'static str, priority: u8, trail: &Trail) -> ComponentSpec<Trail> {
    let trail = trail.clone();
    ComponentSpec::task(name, Priority(priority), move |_| Ok(trail)).on_interrupt(
        name,
        move |trail, _, _| {
            trail.lock().unwrap().push(format!("{name}:start"));
            thread::yield_now();
            trail.lock().unwrap().push(format!("{name}:end"));
            Status::Success
        },
    )
}

fn three_tasks(trail: &Trail) -> Kernel {
    SystemBuilder::new(KernelConfig::default())
        .interrupt("a")
        .interrupt("b")
        .interrupt("c")
        .register(logged_task("a", 3, trail))
        .register(logged_task("b", 2, trail))
        .register(logged_task("c", 2, trail))
        .build()
        .unwrap()
}

fn expected(order: &[&str]) -> Vec<String> {
    order
        .iter()
        .flat_map(|name| [format!("{name}:start"), format!("{name}:end")])
        .collect()
}

#[test]
fn every_arrival_order_respects_priority_then_arrival() {
    let permutations: [[&str; 3]; 6] = [
        ["a", "b", "c"],
        ["a", "c", "b"],
        ["b", "a", "c"],
        ["b", "c", "a"],
        ["c", "a", "b"],
        ["c", "b", "a"],
    ];

    for arrivals in permutations {
        let trail = Trail::default();
        let kernel = three_tasks(&trail);
        for source in arrivals {
            kernel.raise(source, 0).unwrap();
        }
        kernel.run_until_idle();

        // "a" outranks both; "b" and "c" share a priority and keep arrival order.
        let equal: Vec<&str> = arrivals.iter().copied().filter(|n| *n != "a").collect();
        let order = ["a", equal[0], equal[1]];
        assert_eq!(*trail.lock().unwrap(), expected(&order), "arrivals {arrivals:?}");
    }
}

#[test]
fn higher_priority_arrival_does_not_preempt() {
    let trail = Trail::default();
    let low_trail = trail.clone();

    let kernel = SystemBuilder::new(KernelConfig::default())
        .interrupt("low")
        .interrupt("high")
        .register(
            ComponentSpec::task("low", Priority(1), move |_| Ok(low_trail)).on_interrupt(
                "low",
                |trail, ctx, _| {
                    trail.lock().unwrap().push("low:start".to_owned());
                    ctx.raise("high", 0).unwrap();
                    trail.lock().unwrap().push("low:end".to_owned());
                    Status::Success
                },
            ),
        )
        .register(logged_task("high", 9, &trail))
        .build()
        .unwrap();

    kernel.raise("low", 0).unwrap();
    kernel.run_until_idle();

    assert_eq!(*trail.lock().unwrap(), expected(&["low", "high"]));
}

#[test]
fn concurrent_delivery_never_overlaps_actions() {
    const EVENTS: usize = 200;
    let busy = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicUsize::new(0));

    let task = |name: &'static str, priority: u8| {
        let (busy, done) = (busy.clone(), done.clone());
        ComponentSpec::task(name, Priority(priority), move |_| Ok((busy, done))).on_interrupt(
            name,
            |(busy, done), _, _| {
                assert!(!busy.swap(true, Ordering::AcqRel), "actions overlapped");
                thread::yield_now();
                busy.store(false, Ordering::Release);
                done.fetch_add(1, Ordering::AcqRel);
                Status::Success
            },
        )
    };
    let (isr_busy, isr_done) = (busy.clone(), done.clone());

    let config = KernelConfig::builder()
        .interrupt_backlog(EVENTS as u16)
        .deferred_handlers(EVENTS as u16)
        .build();
    let kernel = SystemBuilder::new(config)
        .interrupt("hi")
        .interrupt("lo")
        .interrupt("isr")
        .register(task("hi", 5))
        .register(task("lo", 1))
        .register(
            ComponentSpec::handler("isr", move |_| Ok((isr_busy, isr_done))).on_interrupt(
                "isr",
                |(busy, done), _, _| {
                    assert!(!busy.swap(true, Ordering::AcqRel), "handler overlapped an action");
                    busy.store(false, Ordering::Release);
                    done.fetch_add(1, Ordering::AcqRel);
                    Status::Success
                },
            ),
        )
        .build()
        .unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..EVENTS {
                let source = ["hi", "lo", "isr"][i % 3];
                kernel.raise(source, i as u32).unwrap();
            }
        });
        while done.load(Ordering::Acquire) < EVENTS {
            kernel.run_until_idle();
            thread::yield_now();
        }
    });

    assert_eq!(done.load(Ordering::Acquire), EVENTS);
    assert_eq!(kernel.dropped_handler_activations(), 0);
}
