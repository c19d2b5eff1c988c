//! Events, activations and action results.
//!
//! An *event* is a single activation occurrence produced by a source: a
//! periodic tick, an external interrupt, or (internally) the arrival of a
//! message on a queue. The dispatcher turns each event into one activation of
//! every component bound to that source.

use core::fmt;
use core::time::Duration;

/// Identifier of a task, handler or resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u16);

/// Identifier of a periodic or interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u16);

/// Identifier of a message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub u16);

/// Identifier of a memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolId(pub u16);

/// Static task priority. Larger values run first; `0` is reserved for idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Lowest priority a task may use.
    pub const MIN: Priority = Priority(1);
    /// Highest priority a task may use.
    pub const MAX: Priority = Priority(u8::MAX);

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

/// Result reported by an action.
///
/// Purely informational: the dispatcher records it and moves on.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// Application-defined failure code.
    Failure(i32),
}

impl Status {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Success => None,
            Self::Failure(code) => Some(code),
        }
    }
}

impl<E: Into<i32>> From<Result<(), E>> for Status {
    fn from(value: Result<(), E>) -> Self {
        match value {
            Ok(()) => Self::Success,
            Err(code) => Self::Failure(code.into()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(code) => write!(f, "failure({code})"),
        }
    }
}

/// Activation payload of a periodic source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub source: SourceId,
    /// Running count of emitted ticks for this source, starting at 1.
    pub seq: u64,
    /// Periods that elapsed without their own activation (coalesced overrun).
    pub missed: u32,
    /// Deadline this tick was scheduled for, relative to kernel start.
    pub due: Duration,
}

/// Activation payload of an interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    pub source: SourceId,
    /// Opaque word supplied by whoever raised the interrupt.
    pub data: u32,
}

/// An occurrence delivered to the dispatcher from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Tick(Tick),
    Interrupt(Interrupt),
}

impl Event {
    pub fn source(&self) -> SourceId {
        match self {
            Self::Tick(tick) => tick.source,
            Self::Interrupt(irq) => irq.source,
        }
    }
}

/// What an action is being activated with. Messages are moved into the action
/// by the queue binding itself, so only the marker travels here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Input {
    Tick(Tick),
    Interrupt(Interrupt),
    Message,
}
