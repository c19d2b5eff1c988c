//! # rk
//!
//! A deterministic reactive execution core. Small units of reactive logic
//! ("actions") run to completion in response to periodic ticks, external
//! interrupts, and inter-task messages, one action at a time system-wide.
//!
//! ## Module Overview
//! - [`event`]     – Events, identifiers, priorities and action status.
//! - [`resource`]  – Lock-guarded shared state with scoped procedure calls.
//! - [`queue`]     – Bounded FIFO queues with ownership transfer.
//! - [`memory`]    – Pool access ports over `rk-mem` block pools.
//! - [`port`]      – Static wiring and the frozen port table.
//! - [`component`] – Task and handler declarations, action binding.
//! - [`system`]    – The one-time build pass and its configuration errors.
//! - [`kernel`]    – Priority dispatcher with handler precedence.
//! - [`time`]      – Clocks and coalescing periodic cadence.
//! - [`io`]        – Console capability.
//!
//! Handlers run ahead of every task; tasks are served in strict priority
//! order, ties by arrival. Shared state lives only in resources, and the
//! resource call graph is checked for cycles before anything runs.

pub mod component;
pub mod config;
pub mod event;
pub mod io;
pub mod kernel;
pub mod memory;
pub mod port;
pub mod queue;
pub mod resource;
mod scheduler;
pub mod sync;
pub mod system;
pub mod time;
mod trace;

pub use component::{ActionContext, Class, ComponentSpec};
pub use config::{KernelConfig, KernelConfigBuilder};
pub use event::{
    ComponentId, Event, Interrupt, PoolId, Priority, QueueId, SourceId, Status, Tick,
};
pub use io::{BufferConsole, Console};
pub use kernel::{ComponentStats, Kernel, KernelError, SourceKind};
pub use memory::PoolPort;
pub use port::{Binding, Connection, PortError, PortScope, PortTable, ProviderKind, Wiring};
pub use queue::{QueuePolicy, QueueStats, SendError, Sender};
pub use resource::Resource;
pub use rk_mem::{PoolBox, PoolError, PoolStats};
pub use system::{ConfigError, SystemBuilder};
pub use time::{Clock, ManualClock};
pub use trace::{TraceError, TraceHook};
