//! System declaration and the one-time build pass.
//!
//! Everything a running [`Kernel`] needs is declared on a [`SystemBuilder`]:
//! resources, queues, pools, event sources, capabilities, the wiring, and the
//! components. [`SystemBuilder::build`] validates the whole graph, builds
//! resources in dependency order, resolves every port, and freezes the
//! result. Any inconsistency is reported as a [`ConfigError`] and no kernel
//! is produced.

use core::time::Duration;
use std::any::{type_name, Any};
use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::component::{Class, ComponentDecl, ComponentSpec, TriggerInfo, TriggerKind};
use crate::config::KernelConfig;
use crate::event::{ComponentId, PoolId, QueueId, SourceId};
use crate::kernel::{Kernel, KernelParts, Slot, Source, SourceKind, Target};
use crate::memory::{PoolControl, PoolPort};
use crate::port::{Connection, PortError, PortScope, ProviderEntry, ProviderKind, Registry, Wiring};
use crate::queue::{ConsumerLink, QueueControl, QueueCore, QueuePolicy};
use crate::resource::Resource;
use crate::scheduler::{Scheduler, TaskBacklog};
use crate::sync::Arc;
use crate::time::{Clock, ManualClock};
use crate::trace::{Spy, TraceHook};

/// Fatal problem found while building a system.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("name '{0}' is declared more than once")]
    DuplicateName(String),
    #[error("'{0}' is declared with zero capacity")]
    ZeroCapacity(String),
    #[error("periodic source '{0}' has a zero period")]
    InvalidPeriod(String),
    #[error("task '{component}' uses reserved priority 0")]
    InvalidPriority { component: String },
    #[error("{count} tasks declared, at most {max} allowed")]
    TooManyTasks { count: usize, max: u16 },
    #[error("{count} handlers declared, at most {max} allowed")]
    TooManyHandlers { count: usize, max: u16 },
    #[error("{count} {kind} declared, at most {max} ids available")]
    TooManyIds {
        kind: &'static str,
        count: usize,
        max: usize,
    },
    #[error("wiring row names unknown component '{component}'")]
    UnknownComponent { component: String },
    #[error("port '{component}.{port}' is connected to unknown provider '{provider}'")]
    UnknownProvider {
        component: String,
        port: String,
        provider: String,
    },
    #[error("port '{component}.{port}' is connected more than once")]
    DuplicatePort { component: String, port: String },
    #[error("'{component}' is triggered by unknown source '{name}'")]
    UnknownSource { component: String, name: String },
    #[error("'{component}' expects '{name}' to be a {expected}")]
    SourceKind {
        component: String,
        name: String,
        expected: String,
    },
    #[error("handler '{component}' cannot consume queue '{queue}'")]
    HandlerConsumer { component: String, queue: String },
    #[error("queue '{queue}' has {consumers} consumer tasks, exactly one required")]
    QueueConsumer { queue: String, consumers: usize },
    #[error("resource calls form a cycle through {0:?}")]
    CyclicResourceCalls(Vec<String>),
    #[error("port '{component}.{port}' is connected but never resolved")]
    UnusedConnection { component: String, port: String },
    #[error("'{component}' consumes {expected} from queue '{queue}' which carries {found}")]
    MessageType {
        component: String,
        queue: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error(transparent)]
    Port(#[from] PortError),
}

type ResourceFactory = Box<
    dyn FnOnce(ComponentId, &str, &mut PortScope<'_>) -> Result<Arc<dyn Any + Send + Sync>, PortError>,
>;

struct ResourceDecl {
    name: String,
    type_name: &'static str,
    build: ResourceFactory,
}

struct QueueDecl {
    name: String,
    capacity: usize,
    type_name: &'static str,
    make: Box<dyn FnOnce(QueueId, Spy) -> Arc<dyn QueueControl>>,
}

struct PoolDecl {
    name: String,
    capacity: usize,
    type_name: &'static str,
    make: Box<dyn FnOnce(PoolId, Spy) -> Arc<dyn PoolControl>>,
}

struct SourceDecl {
    name: String,
    kind: SourceKind,
}

struct CapabilityDecl {
    name: String,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// Declares and builds a system.
pub struct SystemBuilder {
    config: KernelConfig,
    trace: Option<TraceHook>,
    clock: Option<Arc<dyn Clock>>,
    resources: Vec<ResourceDecl>,
    queues: Vec<QueueDecl>,
    pools: Vec<PoolDecl>,
    sources: Vec<SourceDecl>,
    capabilities: Vec<CapabilityDecl>,
    components: Vec<Box<dyn ComponentDecl>>,
    wiring: Wiring,
}

impl SystemBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            trace: None,
            clock: None,
            resources: Vec::new(),
            queues: Vec::new(),
            pools: Vec::new(),
            sources: Vec::new(),
            capabilities: Vec::new(),
            components: Vec::new(),
            wiring: Wiring::new(),
        }
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Time base for periodic sources. Defaults to a [`ManualClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Declares a resource with its initial state.
    pub fn resource<T: Send + 'static>(self, name: impl Into<String>, initial: T) -> Self {
        self.resource_with(name, move |_| Ok(initial))
    }

    /// Declares a resource whose state is built from its own ports. Ports
    /// that resolve to other resources define the resource call graph,
    /// which must be acyclic.
    pub fn resource_with<T, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(&mut PortScope<'_>) -> Result<T, PortError> + 'static,
    {
        let build: ResourceFactory = Box::new(move |id, name, scope| {
            let state = factory(scope)?;
            let resource = Resource::with_id(id, name.to_owned(), state);
            Ok(resource.cell() as Arc<dyn Any + Send + Sync>)
        });
        self.resources.push(ResourceDecl {
            name: name.into(),
            type_name: type_name::<T>(),
            build,
        });
        self
    }

    /// Declares a fail-fast queue.
    pub fn queue<T: Send + 'static>(self, name: impl Into<String>, capacity: usize) -> Self {
        self.queue_with_policy::<T>(name, capacity, QueuePolicy::FailFast)
    }

    pub fn queue_with_policy<T: Send + 'static>(
        mut self,
        name: impl Into<String>,
        capacity: usize,
        policy: QueuePolicy,
    ) -> Self {
        let name = name.into();
        let queue_name = name.clone();
        self.queues.push(QueueDecl {
            name,
            capacity,
            type_name: type_name::<T>(),
            make: Box::new(move |id, spy| {
                QueueCore::<T>::new(id, queue_name, capacity, policy, spy) as Arc<dyn QueueControl>
            }),
        });
        self
    }

    /// Declares a pool of default-initialised blocks.
    pub fn pool<T: Default + Send + 'static>(self, name: impl Into<String>, capacity: usize) -> Self {
        self.pool_with(name, capacity, T::default)
    }

    pub fn pool_with<T, F>(mut self, name: impl Into<String>, capacity: usize, init: F) -> Self
    where
        T: Send + 'static,
        F: FnMut() -> T + 'static,
    {
        let name = name.into();
        let pool_name = name.clone();
        self.pools.push(PoolDecl {
            name,
            capacity,
            type_name: type_name::<T>(),
            make: Box::new(move |id, spy| {
                let pool = rk_mem::Pool::new(pool_name, capacity, init);
                Arc::new(PoolPort::new(id, pool, spy)) as Arc<dyn PoolControl>
            }),
        });
        self
    }

    /// Declares a periodic event source.
    pub fn periodic(mut self, name: impl Into<String>, period: Duration) -> Self {
        self.sources.push(SourceDecl {
            name: name.into(),
            kind: SourceKind::Periodic(period),
        });
        self
    }

    /// Declares an interrupt source, raised with [`Kernel::raise`].
    pub fn interrupt(mut self, name: impl Into<String>) -> Self {
        self.sources.push(SourceDecl {
            name: name.into(),
            kind: SourceKind::Interrupt,
        });
        self
    }

    /// Declares an injected capability, resolved with
    /// [`PortScope::capability`].
    pub fn capability<C>(mut self, name: impl Into<String>, value: Arc<C>) -> Self
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.push(CapabilityDecl {
            name: name.into(),
            type_name: type_name::<C>(),
            value: Arc::new(value),
        });
        self
    }

    pub fn connect(
        mut self,
        component: impl Into<String>,
        port: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        self.wiring.push(component, port, provider);
        self
    }

    /// Adds every row of `wiring`.
    pub fn wiring(mut self, wiring: Wiring) -> Self {
        self.wiring.extend(wiring);
        self
    }

    pub fn register<S: Send + 'static>(mut self, spec: ComponentSpec<S>) -> Self {
        self.components.push(Box::new(spec));
        self
    }

    pub fn build(self) -> Result<Kernel, ConfigError> {
        self.check_declarations()?;

        let SystemBuilder {
            config,
            trace,
            clock,
            resources,
            queues,
            pools,
            sources,
            capabilities,
            components,
            wiring,
        } = self;

        let spy = Spy::default();
        let mut registry = Registry::default();

        for decl in &resources {
            registry.add_provider(
                &decl.name,
                ProviderEntry {
                    kind: ProviderKind::Resource,
                    type_name: decl.type_name,
                    value: None,
                },
            );
        }

        let mut queue_controls = Vec::with_capacity(queues.len());
        for (index, decl) in queues.into_iter().enumerate() {
            let control = (decl.make)(QueueId(index as u16), spy.clone());
            registry.add_provider(
                &decl.name,
                ProviderEntry {
                    kind: ProviderKind::Queue,
                    type_name: decl.type_name,
                    value: Some(Arc::clone(&control).as_any()),
                },
            );
            queue_controls.push((decl.name, decl.capacity, control));
        }

        let mut pool_controls = Vec::with_capacity(pools.len());
        for (index, decl) in pools.into_iter().enumerate() {
            let control = (decl.make)(PoolId(index as u16), spy.clone());
            registry.add_provider(
                &decl.name,
                ProviderEntry {
                    kind: ProviderKind::Pool,
                    type_name: decl.type_name,
                    value: Some(Arc::clone(&control).as_any()),
                },
            );
            pool_controls.push((decl.name, control));
        }

        for decl in capabilities {
            registry.add_provider(
                &decl.name,
                ProviderEntry {
                    kind: ProviderKind::Capability,
                    type_name: decl.type_name,
                    value: Some(decl.value),
                },
            );
        }

        let owners: HashSet<&str> = resources
            .iter()
            .map(|r| r.name.as_str())
            .chain(components.iter().map(|c| c.name()))
            .collect();
        for row in wiring.iter() {
            check_row(row, &owners, &mut registry)?;
        }

        // Resources first, providers before the resources that call them.
        let order = resource_order(&resources, &wiring)?;
        let resource_count = resources.len();
        let mut pending: Vec<Option<ResourceDecl>> = resources.into_iter().map(Some).collect();
        let mut resource_values = Vec::with_capacity(resource_count);
        for index in order {
            let Some(ResourceDecl {
                name,
                type_name,
                build,
            }) = pending[index].take()
            else {
                continue;
            };
            let value = {
                let mut scope = registry.scope(&name);
                build(ComponentId(index as u16), &name, &mut scope)?
            };
            registry.set_value(&name, Arc::clone(&value));
            resource_values.push((name, type_name, value));
        }

        let source_index: HashMap<&str, usize> = sources
            .iter()
            .enumerate()
            .map(|(index, source)| (source.name.as_str(), index))
            .collect();
        check_triggers(&components, &source_index, &sources, &registry, &queue_controls)?;

        let mut tasks = Vec::new();
        let mut handlers = Vec::new();
        for (offset, decl) in components.into_iter().enumerate() {
            let id = ComponentId((resource_count + offset) as u16);
            let class = decl.class();
            let triggers = decl.triggers();
            let runnable = decl.build(id, &mut registry)?;
            let slot = Slot::new(runnable, class);
            match class {
                Class::Task(_) => tasks.push((slot, triggers)),
                Class::Handler => handlers.push((slot, triggers)),
            }
        }

        if let Some((component, port)) = registry.unused().into_iter().next() {
            return Err(ConfigError::UnusedConnection { component, port });
        }

        let capacity_of = |queue: &str| {
            queue_controls
                .iter()
                .find(|(name, _, _)| name == queue)
                .map_or(0, |(_, capacity, _)| *capacity)
        };
        let backlogs = tasks
            .iter()
            .map(|(slot, triggers)| {
                let limits = triggers
                    .iter()
                    .map(|trigger| match trigger.kind {
                        TriggerKind::Tick => 1,
                        TriggerKind::Interrupt => usize::from(config.interrupt_backlog.max(1)),
                        TriggerKind::Message => capacity_of(&trigger.source),
                    })
                    .collect();
                TaskBacklog::new(slot.id(), slot.priority(), limits)
            })
            .collect();
        let scheduler = Arc::new(Scheduler::new(
            backlogs,
            usize::from(config.deferred_handlers.max(1)),
            spy.clone(),
        ));

        let mut routes: Vec<Vec<Target>> = vec![Vec::new(); sources.len()];
        for (slot, (_, triggers)) in tasks.iter().enumerate() {
            for (trigger, info) in triggers.iter().enumerate() {
                let trigger = trigger as u16;
                match info.kind {
                    TriggerKind::Message => {
                        if let Some((_, _, control)) =
                            queue_controls.iter().find(|(name, _, _)| *name == info.source)
                        {
                            control.link(ConsumerLink {
                                scheduler: Arc::clone(&scheduler),
                                slot,
                                trigger,
                            });
                        }
                    }
                    TriggerKind::Tick | TriggerKind::Interrupt => {
                        if let Some(&index) = source_index.get(info.source.as_str()) {
                            routes[index].push(Target::Task { slot, trigger });
                        }
                    }
                }
            }
        }
        for (slot, (_, triggers)) in handlers.iter().enumerate() {
            for (trigger, info) in triggers.iter().enumerate() {
                if let Some(&index) = source_index.get(info.source.as_str()) {
                    routes[index].push(Target::Handler {
                        slot,
                        trigger: trigger as u16,
                    });
                }
            }
        }

        let sources = sources
            .into_iter()
            .zip(routes)
            .enumerate()
            .map(|(index, (decl, targets))| {
                Source::new(SourceId(index as u16), decl.name, decl.kind, targets)
            })
            .collect();

        if let Some(hook) = trace {
            spy.install(hook);
        }

        let ports = registry.into_table();
        log::info!(
            "system '{}' built: {} resources, {} tasks, {} handlers, {} bindings",
            config.name,
            resource_values.len(),
            tasks.len(),
            handlers.len(),
            ports.len()
        );

        Ok(Kernel::from_parts(KernelParts {
            config,
            spy,
            clock: clock.unwrap_or_else(|| Arc::new(ManualClock::new())),
            scheduler,
            tasks: tasks.into_iter().map(|(slot, _)| slot).collect(),
            handlers: handlers.into_iter().map(|(slot, _)| slot).collect(),
            sources,
            resources: resource_values,
            queues: queue_controls
                .into_iter()
                .map(|(name, _, control)| (name, control))
                .collect(),
            pools: pool_controls,
            ports,
        }))
    }

    /// Checks names, sizes and priorities before anything is built.
    fn check_declarations(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let names = self
            .resources
            .iter()
            .map(|r| r.name.as_str())
            .chain(self.queues.iter().map(|q| q.name.as_str()))
            .chain(self.pools.iter().map(|p| p.name.as_str()))
            .chain(self.sources.iter().map(|s| s.name.as_str()))
            .chain(self.capabilities.iter().map(|c| c.name.as_str()))
            .chain(self.components.iter().map(|c| c.name()));
        for name in names {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateName(name.to_owned()));
            }
        }

        // u16::MAX stays reserved for ids outside the system.
        let max = usize::from(u16::MAX);
        let spaces = [
            ("resources and components", self.resources.len() + self.components.len()),
            ("queues", self.queues.len()),
            ("pools", self.pools.len()),
            ("sources", self.sources.len()),
        ];
        if let Some(&(kind, count)) = spaces.iter().find(|(_, count)| *count > max) {
            return Err(ConfigError::TooManyIds { kind, count, max });
        }

        let zero_sized = self
            .queues
            .iter()
            .filter(|q| q.capacity == 0)
            .map(|q| &q.name)
            .chain(self.pools.iter().filter(|p| p.capacity == 0).map(|p| &p.name))
            .next();
        if let Some(name) = zero_sized {
            return Err(ConfigError::ZeroCapacity(name.clone()));
        }

        for source in &self.sources {
            if source.kind == SourceKind::Periodic(Duration::ZERO) {
                return Err(ConfigError::InvalidPeriod(source.name.clone()));
            }
        }

        let mut task_count = 0;
        let mut handler_count = 0;
        for component in &self.components {
            match component.class() {
                Class::Task(priority) if !priority.is_valid() => {
                    return Err(ConfigError::InvalidPriority {
                        component: component.name().to_owned(),
                    });
                }
                Class::Task(_) => task_count += 1,
                Class::Handler => handler_count += 1,
            }
        }
        if task_count > usize::from(self.config.max_tasks) {
            return Err(ConfigError::TooManyTasks {
                count: task_count,
                max: self.config.max_tasks,
            });
        }
        if handler_count > usize::from(self.config.max_handlers) {
            return Err(ConfigError::TooManyHandlers {
                count: handler_count,
                max: self.config.max_handlers,
            });
        }
        Ok(())
    }
}

fn check_row(
    row: &Connection,
    owners: &HashSet<&str>,
    registry: &mut Registry,
) -> Result<(), ConfigError> {
    if !owners.contains(row.component.as_str()) {
        return Err(ConfigError::UnknownComponent {
            component: row.component.clone(),
        });
    }
    if registry.provider(&row.provider).is_none() {
        return Err(ConfigError::UnknownProvider {
            component: row.component.clone(),
            port: row.port.clone(),
            provider: row.provider.clone(),
        });
    }
    if !registry.add_row(row) {
        return Err(ConfigError::DuplicatePort {
            component: row.component.clone(),
            port: row.port.clone(),
        });
    }
    Ok(())
}

/// Orders resources so every resource comes after the resources it calls.
/// Any cycle, including a resource wired to itself, is an error.
fn resource_order(resources: &[ResourceDecl], wiring: &Wiring) -> Result<Vec<usize>, ConfigError> {
    let index: HashMap<&str, usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; resources.len()];
    let mut callers: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
    for row in wiring.iter() {
        if let (Some(&caller), Some(&callee)) = (
            index.get(row.component.as_str()),
            index.get(row.provider.as_str()),
        ) {
            callers[callee].push(caller);
            in_degree[caller] += 1;
        }
    }

    let mut ready: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(resources.len());
    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &caller in &callers[node] {
            in_degree[caller] -= 1;
            if in_degree[caller] == 0 {
                ready.push_back(caller);
            }
        }
    }

    if order.len() == resources.len() {
        Ok(order)
    } else {
        let stuck = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree > 0)
            .map(|(i, _)| resources[i].name.clone())
            .collect();
        Err(ConfigError::CyclicResourceCalls(stuck))
    }
}

fn check_triggers(
    components: &[Box<dyn ComponentDecl>],
    source_index: &HashMap<&str, usize>,
    sources: &[SourceDecl],
    registry: &Registry,
    queues: &[(String, usize, Arc<dyn QueueControl>)],
) -> Result<(), ConfigError> {
    let mut consumed: Vec<TriggerInfo> = Vec::new();

    for component in components {
        let name = component.name();
        for trigger in component.triggers() {
            match trigger.kind {
                TriggerKind::Tick | TriggerKind::Interrupt => {
                    let Some(&index) = source_index.get(trigger.source.as_str()) else {
                        return Err(ConfigError::UnknownSource {
                            component: name.to_owned(),
                            name: trigger.source,
                        });
                    };
                    let matches = matches!(
                        (trigger.kind, sources[index].kind),
                        (TriggerKind::Tick, SourceKind::Periodic(_))
                            | (TriggerKind::Interrupt, SourceKind::Interrupt)
                    );
                    if !matches {
                        return Err(ConfigError::SourceKind {
                            component: name.to_owned(),
                            name: trigger.source,
                            expected: trigger.kind.to_string(),
                        });
                    }
                }
                TriggerKind::Message => {
                    match registry.provider(&trigger.source) {
                        Some(entry) if entry.kind == ProviderKind::Queue => {}
                        Some(_) => {
                            return Err(ConfigError::SourceKind {
                                component: name.to_owned(),
                                name: trigger.source,
                                expected: trigger.kind.to_string(),
                            });
                        }
                        None => {
                            return Err(ConfigError::UnknownSource {
                                component: name.to_owned(),
                                name: trigger.source,
                            });
                        }
                    }
                    if component.class().is_handler() {
                        return Err(ConfigError::HandlerConsumer {
                            component: name.to_owned(),
                            queue: trigger.source,
                        });
                    }
                    consumed.push(trigger);
                }
            }
        }
    }

    let mut consumers: HashMap<&str, usize> = HashMap::new();
    for trigger in &consumed {
        *consumers.entry(trigger.source.as_str()).or_default() += 1;
    }
    for (queue, _, _) in queues {
        let count = consumers.get(queue.as_str()).copied().unwrap_or(0);
        if count != 1 {
            return Err(ConfigError::QueueConsumer {
                queue: queue.clone(),
                consumers: count,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> SystemBuilder {
        SystemBuilder::new(KernelConfig::default())
    }

    #[test]
    fn kahn_order_puts_callees_first() {
        let system = builder()
            .resource("a", 0u8)
            .resource("b", 0u8)
            .resource("c", 0u8)
            .connect("a", "next", "b")
            .connect("b", "next", "c");

        let order = resource_order(&system.resources, &system.wiring).unwrap();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn self_call_is_a_cycle() {
        let system = builder()
            .resource("a", 0u8)
            .connect("a", "me", "a");

        let err = resource_order(&system.resources, &system.wiring).unwrap_err();
        assert_eq!(err, ConfigError::CyclicResourceCalls(vec!["a".into()]));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = builder()
            .resource("x", 0u8)
            .queue::<u8>("x", 4)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateName("x".into()));
    }

    #[test]
    fn id_space_overflow_is_rejected() {
        let count = usize::from(u16::MAX) + 1;
        let err = (0..count)
            .fold(builder(), |b, i| b.resource(format!("r{i}"), 0u8))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::TooManyIds {
                kind: "resources and components",
                count,
                max: usize::from(u16::MAX),
            }
        );
    }
}
