//! Run-to-completion dispatcher.
//!
//! One execution lock serializes every action in the system. Handler
//! activations run as soon as the lock is free, ahead of any task; when an
//! action is already in progress (on this thread or another) they are parked
//! and run the moment it returns, before the next task is selected. Task
//! activations wait in the scheduler and are served one action per
//! [`Kernel::dispatch_once`] call, highest priority first.

use core::fmt;
use core::time::Duration;
use std::any::{type_name, Any};
use std::sync::atomic::{AtomicU64, Ordering};

use rk_mem::PoolStats;
use rk_spy::records;
use thiserror::Error;

use crate::component::{ActionContext, Class, Runnable};
use crate::config::KernelConfig;
use crate::event::{ComponentId, Event, Input, Interrupt, Priority, SourceId, Status, Tick};
use crate::memory::{PoolControl, PoolPort};
use crate::port::PortTable;
use crate::queue::{QueueControl, QueueCore, QueueStats, Sender};
use crate::resource::{Resource, ResourceCell};
use crate::scheduler::{Parked, Scheduler};
use crate::sync::{Arc, Mutex};
use crate::time::{Clock, Periodic};
use crate::trace::Spy;

/// Runtime lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("unknown event source '{0}'")]
    UnknownSource(String),
    #[error("no event source with id {0:?}")]
    UnknownSourceId(SourceId),
    #[error("event does not match the kind of source '{0}'")]
    SourceKind(String),
    #[error("unknown {kind} '{name}'")]
    NotFound { kind: &'static str, name: String },
    #[error("'{name}' holds {found}, not {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// How a source produces events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Periodic(Duration),
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Task { slot: usize, trigger: u16 },
    Handler { slot: usize, trigger: u16 },
}

pub(crate) struct Source {
    id: SourceId,
    name: String,
    kind: SourceKind,
    periodic: Option<Mutex<Periodic>>,
    targets: Vec<Target>,
}

impl Source {
    pub(crate) fn new(id: SourceId, name: String, kind: SourceKind, targets: Vec<Target>) -> Self {
        let periodic = match kind {
            SourceKind::Periodic(period) => Some(Mutex::new(Periodic::new(id, period))),
            SourceKind::Interrupt => None,
        };
        Self {
            id,
            name,
            kind,
            periodic,
            targets,
        }
    }
}

/// Activation counters of one task or handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentStats {
    /// Actions run to completion.
    pub activations: u64,
    /// Actions that returned [`Status::Failure`].
    pub failures: u64,
    pub last_failure: Option<i32>,
    /// Activations waiting in the task backlog.
    pub pending: usize,
    /// Activations dropped on a full backlog.
    pub dropped: u64,
}

pub(crate) struct Slot {
    runnable: Arc<dyn Runnable>,
    class: Class,
    stats: Mutex<ComponentStats>,
}

impl Slot {
    pub(crate) fn new(runnable: Arc<dyn Runnable>, class: Class) -> Self {
        Self {
            runnable,
            class,
            stats: Mutex::new(ComponentStats::default()),
        }
    }

    pub(crate) fn id(&self) -> ComponentId {
        self.runnable.id()
    }

    pub(crate) fn priority(&self) -> Priority {
        match self.class {
            Class::Task(priority) => priority,
            Class::Handler => Priority(0),
        }
    }
}

pub(crate) struct KernelParts {
    pub(crate) config: KernelConfig,
    pub(crate) spy: Spy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) tasks: Vec<Slot>,
    pub(crate) handlers: Vec<Slot>,
    pub(crate) sources: Vec<Source>,
    pub(crate) resources: Vec<(String, &'static str, Arc<dyn Any + Send + Sync>)>,
    pub(crate) queues: Vec<(String, Arc<dyn QueueControl>)>,
    pub(crate) pools: Vec<(String, Arc<dyn PoolControl>)>,
    pub(crate) ports: PortTable,
}

/// A built system, ready to dispatch.
pub struct Kernel {
    config: KernelConfig,
    spy: Spy,
    clock: Arc<dyn Clock>,
    /// Clock reading at [`Kernel::start`], in nanoseconds.
    epoch: AtomicU64,
    exec: Mutex<()>,
    scheduler: Arc<Scheduler>,
    tasks: Vec<Slot>,
    handlers: Vec<Slot>,
    sources: Vec<Source>,
    resources: Vec<(String, &'static str, Arc<dyn Any + Send + Sync>)>,
    queues: Vec<(String, Arc<dyn QueueControl>)>,
    pools: Vec<(String, Arc<dyn PoolControl>)>,
    ports: PortTable,
}

impl Kernel {
    pub(crate) fn from_parts(parts: KernelParts) -> Self {
        Self {
            config: parts.config,
            spy: parts.spy,
            clock: parts.clock,
            epoch: AtomicU64::new(0),
            exec: Mutex::new(()),
            scheduler: parts.scheduler,
            tasks: parts.tasks,
            handlers: parts.handlers,
            sources: parts.sources,
            resources: parts.resources,
            queues: parts.queues,
            pools: parts.pools,
            ports: parts.ports,
        }
    }

    /// Announces the system on the trace stream and restarts kernel time.
    ///
    /// Periodic cadences are anchored at the moment of the call, however long
    /// ago the clock was created.
    pub fn start(&self) {
        self.epoch
            .store(self.clock.now().as_nanos() as u64, Ordering::Release);
        for periodic in self.sources.iter().filter_map(|s| s.periodic.as_ref()) {
            periodic.lock().rewind();
        }
        if self.config.trace_dictionary && self.spy.is_enabled() {
            for slot in self.tasks.iter().chain(&self.handlers) {
                let id = slot.id();
                self.spy.emit(records::info::OBJ_DICT, |p| {
                    p.push_u16(id.0).push_str(slot.runnable.name());
                });
            }
        }
        self.spy.emit(records::info::STARTED, |p| {
            p.push_u16(self.tasks.len() as u16)
                .push_u16(self.handlers.len() as u16)
                .push_u16(self.sources.len() as u16);
        });
        log::info!(
            "kernel '{}' started: {} tasks, {} handlers, {} sources",
            self.config.name,
            self.tasks.len(),
            self.handlers.len(),
            self.sources.len()
        );
    }

    /// Delivers an event to every component bound to its source.
    pub fn deliver(&self, event: Event) -> Result<(), KernelError> {
        let source = self
            .sources
            .get(usize::from(event.source().0))
            .ok_or(KernelError::UnknownSourceId(event.source()))?;

        let input = match (event, source.kind) {
            (Event::Tick(tick), SourceKind::Periodic(_)) => Input::Tick(tick),
            (Event::Interrupt(irq), SourceKind::Interrupt) => Input::Interrupt(irq),
            _ => return Err(KernelError::SourceKind(source.name.clone())),
        };

        let mut handlers_pending = false;
        for target in &source.targets {
            match *target {
                Target::Task { slot, trigger } => {
                    self.scheduler.make_ready(slot, trigger, input);
                }
                // Parked only behind an action in progress.
                Target::Handler { slot, trigger } => match self.exec.try_lock() {
                    Some(_exec) => {
                        self.run_parked();
                        self.run(&self.handlers[slot], trigger, input);
                        self.run_parked();
                    }
                    None => {
                        handlers_pending |= self.scheduler.park(Parked {
                            slot,
                            trigger,
                            input,
                        });
                    }
                },
            }
        }

        if handlers_pending {
            self.drain_handlers();
        }
        Ok(())
    }

    /// Raises the named interrupt source.
    pub fn raise(&self, source: &str, data: u32) -> Result<(), KernelError> {
        let id = self
            .source_id(source)
            .ok_or_else(|| KernelError::UnknownSource(source.to_owned()))?;
        self.deliver(Event::Interrupt(Interrupt { source: id, data }))
    }

    /// Polls every periodic source against the kernel clock.
    pub fn poll_sources(&self) -> usize {
        self.advance(self.now())
    }

    /// Polls every periodic source as if the kernel time were `now`. Returns
    /// the number of ticks delivered.
    pub fn advance(&self, now: Duration) -> usize {
        let mut fired = 0;
        for source in &self.sources {
            let Some(periodic) = &source.periodic else {
                continue;
            };
            let tick: Option<Tick> = periodic.lock().poll(now);
            if let Some(tick) = tick {
                self.spy.emit(records::timer::TICK, |p| {
                    p.push_u16(source.id.0).push_u32(tick.missed);
                });
                if tick.missed > 0 {
                    log::debug!(
                        "source '{}' overran by {} periods, coalesced",
                        source.name,
                        tick.missed
                    );
                }
                // The source and its kind were just checked.
                let _ = self.deliver(Event::Tick(tick));
                fired += 1;
            }
        }
        fired
    }

    /// Runs at most one task action to completion. Returns `false` when no
    /// task was ready.
    pub fn dispatch_once(&self) -> bool {
        let ran = {
            let _exec = self.exec.lock();
            self.run_parked();
            let ran = match self.scheduler.next() {
                Some((slot, activation)) => {
                    self.run(&self.tasks[slot], activation.trigger, activation.input);
                    true
                }
                None => false,
            };
            self.run_parked();
            ran
        };
        self.drain_handlers();
        ran
    }

    /// Dispatches until no task is ready, then calls the idle callback.
    pub fn run_until_idle(&self) -> usize {
        let mut actions = 0;
        while self.dispatch_once() {
            actions += 1;
        }
        if let Some(idle) = self.config.idle_callback {
            idle();
        }
        actions
    }

    pub fn has_ready(&self) -> bool {
        self.scheduler.has_ready()
    }

    /// Time since [`Kernel::start`], or since clock zero before it.
    pub fn now(&self) -> Duration {
        let epoch = Duration::from_nanos(self.epoch.load(Ordering::Acquire));
        self.clock.now().saturating_sub(epoch)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn port_table(&self) -> &PortTable {
        &self.ports
    }

    pub fn source_id(&self, name: &str) -> Option<SourceId> {
        self.sources
            .iter()
            .find(|source| source.name == name)
            .map(|source| source.id)
    }

    /// Producer end of a queue for code running outside the dispatcher.
    pub fn sender<T: Send + 'static>(&self, queue: &str) -> Result<Sender<T>, KernelError> {
        let (_, control) = self
            .queues
            .iter()
            .find(|(name, _)| name == queue)
            .ok_or_else(|| not_found("queue", queue))?;
        let found = control.item_type();
        let core = Arc::clone(control)
            .as_any()
            .downcast::<QueueCore<T>>()
            .map_err(|_| KernelError::TypeMismatch {
                name: queue.to_owned(),
                expected: type_name::<T>(),
                found,
            })?;
        Ok(Sender::new(core))
    }

    pub fn resource<T: Send + 'static>(&self, name: &str) -> Result<Resource<T>, KernelError> {
        let (_, found, value) = self
            .resources
            .iter()
            .find(|(resource, _, _)| resource == name)
            .ok_or_else(|| not_found("resource", name))?;
        let found = *found;
        let cell = Arc::clone(value)
            .downcast::<ResourceCell<T>>()
            .map_err(|_| KernelError::TypeMismatch {
                name: name.to_owned(),
                expected: type_name::<T>(),
                found,
            })?;
        Ok(Resource::from_cell(cell))
    }

    pub fn pool<T: Send + 'static>(&self, name: &str) -> Result<PoolPort<T>, KernelError> {
        let (_, control) = self
            .pools
            .iter()
            .find(|(pool, _)| pool == name)
            .ok_or_else(|| not_found("pool", name))?;
        let found = control.item_type();
        let pool = Arc::clone(control)
            .as_any()
            .downcast::<PoolPort<T>>()
            .map_err(|_| KernelError::TypeMismatch {
                name: name.to_owned(),
                expected: type_name::<T>(),
                found,
            })?;
        Ok(PoolPort::clone(&pool))
    }

    pub fn queue_stats(&self, name: &str) -> Option<QueueStats> {
        self.queues
            .iter()
            .find(|(queue, _)| queue == name)
            .map(|(_, control)| control.stats())
    }

    pub fn pool_stats(&self, name: &str) -> Option<PoolStats> {
        self.pools
            .iter()
            .find(|(pool, _)| pool == name)
            .map(|(_, control)| control.stats())
    }

    pub fn component_stats(&self, name: &str) -> Option<ComponentStats> {
        if let Some(slot) = self.tasks.iter().position(|s| s.runnable.name() == name) {
            let mut stats = *self.tasks[slot].stats.lock();
            stats.pending = self.scheduler.pending(slot);
            stats.dropped = self.scheduler.dropped(slot);
            return Some(stats);
        }
        self.handlers
            .iter()
            .find(|s| s.runnable.name() == name)
            .map(|s| *s.stats.lock())
    }

    /// Handler activations lost because too many were parked at once.
    pub fn dropped_handler_activations(&self) -> u64 {
        self.scheduler.parked_dropped()
    }

    /// Runs parked handlers whenever the execution lock is free. If another
    /// context holds it, that context runs them before it lets go.
    fn drain_handlers(&self) {
        while self.scheduler.has_parked() {
            let Some(_exec) = self.exec.try_lock() else {
                self.spy.emit(records::action::DEFERRED, |_| {});
                log::trace!("handler activation deferred behind a running action");
                return;
            };
            self.run_parked();
        }
    }

    /// Caller holds the execution lock.
    fn run_parked(&self) {
        while let Some(parked) = self.scheduler.take_parked() {
            self.run(&self.handlers[parked.slot], parked.trigger, parked.input);
        }
    }

    /// Caller holds the execution lock.
    fn run(&self, slot: &Slot, trigger: u16, input: Input) {
        let id = slot.id();
        let name = slot.runnable.name();
        self.spy.emit(records::action::DISPATCH, |p| {
            p.push_u16(id.0).push_u16(trigger);
        });
        log::debug!("dispatch '{name}' trigger {trigger}");

        let mut ctx = ActionContext::new(self, id, name);
        let Some(status) = slot.runnable.run(trigger, input, &mut ctx) else {
            log::trace!("'{name}' had nothing to act on for trigger {trigger}");
            return;
        };

        {
            let mut stats = slot.stats.lock();
            stats.activations += 1;
            if let Status::Failure(code) = status {
                stats.failures += 1;
                stats.last_failure = Some(code);
            }
        }
        if let Status::Failure(code) = status {
            log::warn!("'{name}' reported failure {code}");
        }
        self.spy.emit(records::action::STATUS, |p| {
            p.push_u16(id.0)
                .push_u8(u8::from(status.is_success()))
                .push_i32(status.code().unwrap_or(0));
        });
    }
}

fn not_found(kind: &'static str, name: &str) -> KernelError {
    KernelError::NotFound {
        kind,
        name: name.to_owned(),
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.config.name)
            .field("tasks", &self.tasks.len())
            .field("handlers", &self.handlers.len())
            .field("sources", &self.sources.len())
            .field("bindings", &self.ports.len())
            .finish()
    }
}
