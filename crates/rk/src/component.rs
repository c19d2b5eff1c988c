//! Tasks and handlers.
//!
//! A component is declared with a [`ComponentSpec`]: its class (a task with a
//! static priority, or an immediate handler), a factory that builds its
//! private state from resolved ports, and an action table mapping trigger
//! sources to actions. Every action receives the component state, an
//! [`ActionContext`], and the activation payload, and returns a [`Status`].

use core::fmt;
use core::time::Duration;
use std::any::{type_name, Any};

use crate::event::{ComponentId, Input, Interrupt, Priority, Status, Tick};
use crate::kernel::{Kernel, KernelError};
use crate::port::{PortError, PortScope, Registry};
use crate::queue::QueueCore;
use crate::sync::{Arc, Mutex};
use crate::system::ConfigError;

/// Scheduling class of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Queued and served in priority order.
    Task(Priority),
    /// Run as soon as its event is delivered, ahead of every task.
    Handler,
}

impl Class {
    pub fn is_handler(self) -> bool {
        matches!(self, Self::Handler)
    }
}

/// What a trigger listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerKind {
    Tick,
    Interrupt,
    Message,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tick => "periodic source",
            Self::Interrupt => "interrupt source",
            Self::Message => "queue",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TriggerInfo {
    pub(crate) kind: TriggerKind,
    pub(crate) source: String,
    pub(crate) item_type: &'static str,
}

type BoundAction<S> =
    Box<dyn for<'k> FnMut(&mut S, &mut ActionContext<'k>, Input) -> Option<Status> + Send>;

type Bind<S> = Box<dyn FnOnce(Option<Arc<dyn Any + Send + Sync>>) -> Option<BoundAction<S>>>;

type Factory<S> = Box<dyn FnOnce(&mut PortScope<'_>) -> Result<S, PortError>>;

struct TriggerDecl<S> {
    info: TriggerInfo,
    bind: Bind<S>,
}

/// Declaration of a task or handler.
pub struct ComponentSpec<S> {
    name: String,
    class: Class,
    factory: Factory<S>,
    triggers: Vec<TriggerDecl<S>>,
}

impl<S: Send + 'static> ComponentSpec<S> {
    /// Declares a task served at `priority`.
    pub fn task<F>(name: impl Into<String>, priority: Priority, factory: F) -> Self
    where
        F: FnOnce(&mut PortScope<'_>) -> Result<S, PortError> + 'static,
    {
        Self::new(name.into(), Class::Task(priority), Box::new(factory))
    }

    /// Declares an immediate handler.
    pub fn handler<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce(&mut PortScope<'_>) -> Result<S, PortError> + 'static,
    {
        Self::new(name.into(), Class::Handler, Box::new(factory))
    }

    fn new(name: String, class: Class, factory: Factory<S>) -> Self {
        Self {
            name,
            class,
            factory,
            triggers: Vec::new(),
        }
    }

    /// Runs `action` on every tick of the named periodic source.
    pub fn on_tick<F>(mut self, source: impl Into<String>, mut action: F) -> Self
    where
        F: FnMut(&mut S, &mut ActionContext<'_>, Tick) -> Status + Send + 'static,
    {
        let bound: BoundAction<S> = Box::new(move |state, ctx, input| match input {
            Input::Tick(tick) => Some(action(state, ctx, tick)),
            _ => None,
        });
        self.push_trigger(TriggerKind::Tick, source.into(), type_name::<Tick>(), bound);
        self
    }

    /// Runs `action` on every occurrence of the named interrupt source.
    pub fn on_interrupt<F>(mut self, source: impl Into<String>, mut action: F) -> Self
    where
        F: FnMut(&mut S, &mut ActionContext<'_>, Interrupt) -> Status + Send + 'static,
    {
        let bound: BoundAction<S> = Box::new(move |state, ctx, input| match input {
            Input::Interrupt(irq) => Some(action(state, ctx, irq)),
            _ => None,
        });
        self.push_trigger(
            TriggerKind::Interrupt,
            source.into(),
            type_name::<Interrupt>(),
            bound,
        );
        self
    }

    /// Consumes the named queue: each item is moved into `action` in the
    /// order it was sent.
    pub fn on_message<T, F>(mut self, queue: impl Into<String>, mut action: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(&mut S, &mut ActionContext<'_>, T) -> Status + Send + 'static,
    {
        let bind: Bind<S> = Box::new(move |provider| {
            let core = provider?.downcast::<QueueCore<T>>().ok()?;
            let bound: BoundAction<S> = Box::new(move |state, ctx, input| match input {
                Input::Message => core.pop().map(|item| action(state, ctx, item)),
                _ => None,
            });
            Some(bound)
        });
        self.triggers.push(TriggerDecl {
            info: TriggerInfo {
                kind: TriggerKind::Message,
                source: queue.into(),
                item_type: type_name::<T>(),
            },
            bind,
        });
        self
    }

    fn push_trigger(
        &mut self,
        kind: TriggerKind,
        source: String,
        item_type: &'static str,
        bound: BoundAction<S>,
    ) {
        self.triggers.push(TriggerDecl {
            info: TriggerInfo {
                kind,
                source,
                item_type,
            },
            bind: Box::new(move |_| Some(bound)),
        });
    }
}

impl<S> fmt::Debug for ComponentSpec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("name", &self.name)
            .field("class", &self.class)
            .field(
                "triggers",
                &self.triggers.iter().map(|t| &t.info.source).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Erased declaration consumed by the system builder.
pub(crate) trait ComponentDecl {
    fn name(&self) -> &str;
    fn class(&self) -> Class;
    fn triggers(&self) -> Vec<TriggerInfo>;
    fn build(
        self: Box<Self>,
        id: ComponentId,
        registry: &mut Registry,
    ) -> Result<Arc<dyn Runnable>, ConfigError>;
}

impl<S: Send + 'static> ComponentDecl for ComponentSpec<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> Class {
        self.class
    }

    fn triggers(&self) -> Vec<TriggerInfo> {
        self.triggers.iter().map(|t| t.info.clone()).collect()
    }

    fn build(
        self: Box<Self>,
        id: ComponentId,
        registry: &mut Registry,
    ) -> Result<Arc<dyn Runnable>, ConfigError> {
        let ComponentSpec {
            name,
            factory,
            triggers,
            ..
        } = *self;

        let state = {
            let mut scope = registry.scope(&name);
            factory(&mut scope)?
        };

        let mut actions = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            let provider = match trigger.info.kind {
                TriggerKind::Message => registry
                    .provider(&trigger.info.source)
                    .and_then(|entry| entry.value.clone()),
                _ => None,
            };
            let found = registry
                .provider(&trigger.info.source)
                .map_or("<none>", |entry| entry.type_name);
            let action = (trigger.bind)(provider).ok_or_else(|| ConfigError::MessageType {
                component: name.clone(),
                queue: trigger.info.source.clone(),
                expected: trigger.info.item_type,
                found,
            })?;
            actions.push(action);
        }

        Ok(Arc::new(Component {
            id,
            name,
            bound: Mutex::new(Bound { state, actions }),
        }))
    }
}

/// Object-safe interface used by the dispatcher.
pub(crate) trait Runnable: Send + Sync {
    fn id(&self) -> ComponentId;
    fn name(&self) -> &str;
    /// Runs the action bound to `trigger`. `None` means the activation had
    /// nothing to act on.
    fn run(&self, trigger: u16, input: Input, ctx: &mut ActionContext<'_>) -> Option<Status>;
}

struct Bound<S> {
    state: S,
    actions: Vec<BoundAction<S>>,
}

struct Component<S> {
    id: ComponentId,
    name: String,
    bound: Mutex<Bound<S>>,
}

impl<S: Send + 'static> Runnable for Component<S> {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, trigger: u16, input: Input, ctx: &mut ActionContext<'_>) -> Option<Status> {
        let mut bound = self.bound.lock();
        let Bound { state, actions } = &mut *bound;
        let action = actions.get_mut(usize::from(trigger))?;
        action(state, ctx, input)
    }
}

/// Per-activation view of the kernel handed to actions.
pub struct ActionContext<'k> {
    kernel: &'k Kernel,
    id: ComponentId,
    name: &'k str,
}

impl<'k> ActionContext<'k> {
    pub(crate) fn new(kernel: &'k Kernel, id: ComponentId, name: &'k str) -> Self {
        Self { kernel, id, name }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Kernel time.
    pub fn now(&self) -> Duration {
        self.kernel.now()
    }

    /// Raises an interrupt source. Handlers bound to it run right after the
    /// current action returns.
    pub fn raise(&self, source: &str, data: u32) -> Result<(), KernelError> {
        self.kernel.raise(source, data)
    }
}
