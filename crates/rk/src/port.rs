//! Static port wiring.
//!
//! A [`Wiring`] lists `(component, port) -> provider` rows. While the system
//! is built, every component factory resolves its ports through a
//! [`PortScope`] into typed handles; the rows that were resolved are frozen
//! into a [`PortTable`] that never changes afterwards.

use core::fmt;
use std::any::{type_name, Any};
use std::collections::HashMap;

use thiserror::Error;

use crate::memory::PoolPort;
use crate::queue::{QueueCore, QueuePolicy, Sender};
use crate::resource::{Resource, ResourceCell};
use crate::sync::Arc;

/// One wiring row.
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub component: String,
    pub port: String,
    pub provider: String,
}

/// The full list of wiring rows for a system.
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wiring {
    connections: Vec<Connection>,
}

impl Wiring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row, builder style.
    pub fn connect(
        mut self,
        component: impl Into<String>,
        port: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        self.push(component, port, provider);
        self
    }

    pub fn push(
        &mut self,
        component: impl Into<String>,
        port: impl Into<String>,
        provider: impl Into<String>,
    ) {
        self.connections.push(Connection {
            component: component.into(),
            port: port.into(),
            provider: provider.into(),
        });
    }

    pub fn extend(&mut self, other: Wiring) {
        self.connections.extend(other.connections);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Parses a JSON array of `{"component", "port", "provider"}` objects.
    #[cfg(feature = "serde")]
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// What a provider is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Resource,
    Queue,
    Pool,
    Capability,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resource => "resource",
            Self::Queue => "queue",
            Self::Pool => "pool",
            Self::Capability => "capability",
        };
        f.write_str(name)
    }
}

/// Failure to resolve a port into a typed handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("port '{component}.{port}' is not connected")]
    Unresolved { component: String, port: String },
    #[error("port '{component}.{port}' expects a {expected} but is connected to a {found}")]
    KindMismatch {
        component: String,
        port: String,
        expected: ProviderKind,
        found: ProviderKind,
    },
    #[error("port '{component}.{port}' expects {expected} but the provider holds {found}")]
    TypeMismatch {
        component: String,
        port: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("port '{component}.{port}' produces into blocking queue '{queue}'")]
    BlockingProducer {
        component: String,
        port: String,
        queue: String,
    },
}

/// A resolved row of the port table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub component: String,
    pub port: String,
    pub provider: String,
    pub kind: ProviderKind,
}

/// Immutable table of resolved bindings.
#[derive(Debug, Clone, Default)]
pub struct PortTable {
    bindings: Arc<[Binding]>,
}

impl PortTable {
    pub(crate) fn freeze(mut bindings: Vec<Binding>) -> Self {
        bindings.sort_by(|a, b| (&a.component, &a.port).cmp(&(&b.component, &b.port)));
        Self {
            bindings: bindings.into(),
        }
    }

    pub fn lookup(&self, component: &str, port: &str) -> Option<&Binding> {
        self.bindings
            .binary_search_by(|b| (b.component.as_str(), b.port.as_str()).cmp(&(component, port)))
            .ok()
            .map(|index| &self.bindings[index])
    }

    /// Bindings of one component, ordered by port name.
    pub fn component<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a Binding> + 'a {
        self.bindings.iter().filter(move |b| b.component == component)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

pub(crate) struct ProviderEntry {
    pub(crate) kind: ProviderKind,
    pub(crate) type_name: &'static str,
    /// Empty until the provider is built. Resources are built in dependency
    /// order, everything else exists before any factory runs.
    pub(crate) value: Option<Arc<dyn Any + Send + Sync>>,
}

struct Row {
    provider: String,
    used: bool,
}

/// Providers and wiring rows visible to factories during a build.
#[derive(Default)]
pub(crate) struct Registry {
    providers: HashMap<String, ProviderEntry>,
    rows: HashMap<(String, String), Row>,
    bindings: Vec<Binding>,
}

impl Registry {
    pub(crate) fn add_provider(&mut self, name: &str, entry: ProviderEntry) {
        self.providers.insert(name.to_owned(), entry);
    }

    pub(crate) fn provider(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }

    pub(crate) fn set_value(&mut self, name: &str, value: Arc<dyn Any + Send + Sync>) {
        if let Some(entry) = self.providers.get_mut(name) {
            entry.value = Some(value);
        }
    }

    /// Returns `false` when the row is a duplicate.
    pub(crate) fn add_row(&mut self, connection: &Connection) -> bool {
        let key = (connection.component.clone(), connection.port.clone());
        if self.rows.contains_key(&key) {
            return false;
        }
        self.rows.insert(
            key,
            Row {
                provider: connection.provider.clone(),
                used: false,
            },
        );
        true
    }

    /// Wiring rows that no factory asked for.
    pub(crate) fn unused(&self) -> Vec<(String, String)> {
        let mut unused: Vec<_> = self
            .rows
            .iter()
            .filter(|(_, row)| !row.used)
            .map(|(key, _)| key.clone())
            .collect();
        unused.sort();
        unused
    }

    pub(crate) fn into_table(self) -> PortTable {
        PortTable::freeze(self.bindings)
    }

    pub(crate) fn scope<'a>(&'a mut self, component: &'a str) -> PortScope<'a> {
        PortScope {
            component,
            registry: self,
        }
    }
}

/// Port resolver handed to component and resource factories.
pub struct PortScope<'a> {
    component: &'a str,
    registry: &'a mut Registry,
}

impl<'a> PortScope<'a> {
    /// Name of the component being built.
    pub fn component(&self) -> &str {
        self.component
    }

    /// Resolves a resource access port.
    pub fn resource<T: Send + 'static>(&mut self, port: &str) -> Result<Resource<T>, PortError> {
        let (value, found) = self.resolve(port, ProviderKind::Resource)?;
        let cell = value
            .downcast::<ResourceCell<T>>()
            .map_err(|_| self.type_mismatch::<T>(port, found))?;
        Ok(Resource::from_cell(cell))
    }

    /// Resolves the producer end of a queue.
    ///
    /// Components run inside the dispatcher and must never wait, so a queue
    /// declared with [`QueuePolicy::Block`] cannot be bound here.
    pub fn sender<T: Send + 'static>(&mut self, port: &str) -> Result<Sender<T>, PortError> {
        let (value, found) = self.resolve(port, ProviderKind::Queue)?;
        let core = value
            .downcast::<QueueCore<T>>()
            .map_err(|_| self.type_mismatch::<T>(port, found))?;
        let sender = Sender::new(core);
        if sender.policy() == QueuePolicy::Block {
            return Err(PortError::BlockingProducer {
                component: self.component.to_owned(),
                port: port.to_owned(),
                queue: sender.name().to_owned(),
            });
        }
        Ok(sender)
    }

    /// Resolves a pool access port.
    pub fn pool<T: Send + 'static>(&mut self, port: &str) -> Result<PoolPort<T>, PortError> {
        let (value, found) = self.resolve(port, ProviderKind::Pool)?;
        let pool = value
            .downcast::<PoolPort<T>>()
            .map_err(|_| self.type_mismatch::<T>(port, found))?;
        Ok(PoolPort::clone(&pool))
    }

    /// Resolves an injected capability such as a [`Console`](crate::io::Console).
    pub fn capability<C>(&mut self, port: &str) -> Result<Arc<C>, PortError>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let (value, found) = self.resolve(port, ProviderKind::Capability)?;
        let capability = value
            .downcast::<Arc<C>>()
            .map_err(|_| self.type_mismatch::<C>(port, found))?;
        Ok(Arc::clone(&capability))
    }

    fn resolve(
        &mut self,
        port: &str,
        expected: ProviderKind,
    ) -> Result<(Arc<dyn Any + Send + Sync>, &'static str), PortError> {
        let unresolved = || PortError::Unresolved {
            component: self.component.to_owned(),
            port: port.to_owned(),
        };

        let key = (self.component.to_owned(), port.to_owned());
        let provider = match self.registry.rows.get(&key) {
            Some(row) => row.provider.clone(),
            None => return Err(unresolved()),
        };
        let Some(entry) = self.registry.providers.get(&provider) else {
            return Err(unresolved());
        };
        if entry.kind != expected {
            return Err(PortError::KindMismatch {
                component: self.component.to_owned(),
                port: port.to_owned(),
                expected,
                found: entry.kind,
            });
        }
        let Some(value) = entry.value.clone() else {
            return Err(unresolved());
        };
        let found = entry.type_name;

        if let Some(row) = self.registry.rows.get_mut(&key) {
            if !row.used {
                row.used = true;
                self.registry.bindings.push(Binding {
                    component: key.0,
                    port: key.1,
                    provider,
                    kind: expected,
                });
            }
        }
        Ok((value, found))
    }

    fn type_mismatch<T: ?Sized>(&self, port: &str, found: &'static str) -> PortError {
        PortError::TypeMismatch {
            component: self.component.to_owned(),
            port: port.to_owned(),
            expected: type_name::<T>(),
            found,
        }
    }
}
