//! Bounded FIFO queues carrying owned payloads to exactly one consumer task.
//!
//! A successful send moves the item into the queue and makes the consumer
//! ready; the dispatcher later pops the oldest item and moves it into the
//! consumer's action. A send on a full queue hands the item back untouched.

use core::fmt;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::OnceLock;

use rk_spy::records;

use crate::event::{Input, QueueId};
use crate::scheduler::Scheduler;
use crate::sync::{Arc, Mutex};
use crate::trace::Spy;

/// What a send does when the queue is full.
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Return the item to the caller immediately.
    #[default]
    FailFast,
    /// Wait for the consumer to make room. Only producers outside the
    /// dispatcher may be bound to such a queue.
    Block,
}

/// Error returned by a rejected send. Carries the item back to the caller.
pub enum SendError<T> {
    Full(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) => item,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("queue is full"),
        }
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Occupancy counters of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    pub len: usize,
    pub high_water: usize,
    pub sent: u64,
    pub received: u64,
    pub rejected: u64,
}

struct QueueBuf<T> {
    items: VecDeque<T>,
    stats: QueueStats,
}

/// Where a queue reports new items.
pub(crate) struct ConsumerLink {
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) slot: usize,
    pub(crate) trigger: u16,
}

pub(crate) struct QueueCore<T> {
    id: QueueId,
    name: String,
    policy: QueuePolicy,
    buf: Mutex<QueueBuf<T>>,
    consumer: OnceLock<ConsumerLink>,
    spy: Spy,
}

impl<T: Send + 'static> QueueCore<T> {
    pub(crate) fn new(
        id: QueueId,
        name: String,
        capacity: usize,
        policy: QueuePolicy,
        spy: Spy,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            policy,
            buf: Mutex::new(QueueBuf {
                items: VecDeque::with_capacity(capacity),
                stats: QueueStats {
                    capacity,
                    ..QueueStats::default()
                },
            }),
            consumer: OnceLock::new(),
            spy,
        })
    }

    fn push(&self, item: T) -> Result<usize, T> {
        let mut buf = self.buf.lock();
        if buf.items.len() >= buf.stats.capacity {
            return Err(item);
        }
        buf.items.push_back(item);
        let len = buf.items.len();
        buf.stats.sent += 1;
        buf.stats.len = len;
        buf.stats.high_water = buf.stats.high_water.max(len);
        Ok(len)
    }

    /// Removes the oldest item. Called by the dispatcher on behalf of the
    /// consumer action.
    pub(crate) fn pop(&self) -> Option<T> {
        let (item, len) = {
            let mut buf = self.buf.lock();
            let item = buf.items.pop_front()?;
            buf.stats.received += 1;
            buf.stats.len = buf.items.len();
            (item, buf.stats.len)
        };
        self.spy.emit(records::queue::GET, |p| {
            p.push_u16(self.id.0).push_u16(len as u16);
        });
        Some(item)
    }

    fn accepted(&self, len: usize) {
        self.spy.emit(records::queue::POST, |p| {
            p.push_u16(self.id.0).push_u16(len as u16);
        });
        if let Some(link) = self.consumer.get() {
            link.scheduler
                .make_ready(link.slot, link.trigger, Input::Message);
        }
    }

    fn rejected(&self) {
        let capacity = {
            let mut buf = self.buf.lock();
            buf.stats.rejected += 1;
            buf.stats.capacity
        };
        log::warn!("queue '{}' full ({capacity} items), send rejected", self.name);
        self.spy.emit(records::queue::FULL, |p| {
            p.push_u16(self.id.0).push_u16(capacity as u16);
        });
    }
}

/// Type-erased view of a queue used while wiring and for diagnostics.
pub(crate) trait QueueControl: Send + Sync {
    fn stats(&self) -> QueueStats;
    fn link(&self, link: ConsumerLink) -> bool;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn item_type(&self) -> &'static str;
}

impl<T: Send + 'static> QueueControl for QueueCore<T> {
    fn stats(&self) -> QueueStats {
        self.buf.lock().stats
    }

    fn link(&self, link: ConsumerLink) -> bool {
        self.consumer.set(link).is_ok()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn item_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Producer side of a queue.
pub struct Sender<T> {
    core: Arc<QueueCore<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + 'static> Sender<T> {
    pub(crate) fn new(core: Arc<QueueCore<T>>) -> Self {
        Self { core }
    }

    /// Sends according to the queue's [`QueuePolicy`].
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        match self.core.policy {
            QueuePolicy::FailFast => self.try_send(item),
            QueuePolicy::Block => {
                let mut item = item;
                loop {
                    match self.core.push(item) {
                        Ok(len) => {
                            self.core.accepted(len);
                            return Ok(());
                        }
                        Err(back) => {
                            item = back;
                            std::thread::yield_now();
                        }
                    }
                }
            }
        }
    }

    /// Sends without ever waiting, whatever the queue policy.
    pub fn try_send(&self, item: T) -> Result<(), SendError<T>> {
        match self.core.push(item) {
            Ok(len) => {
                self.core.accepted(len);
                Ok(())
            }
            Err(item) => {
                self.core.rejected();
                Err(SendError::Full(item))
            }
        }
    }

    pub fn id(&self) -> QueueId {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn policy(&self) -> QueuePolicy {
        self.core.policy
    }

    pub fn len(&self) -> usize {
        self.core.buf.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.core.buf.lock().stats.capacity
    }

    pub fn stats(&self) -> QueueStats {
        self.core.buf.lock().stats
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("queue", &self.core.name)
            .finish()
    }
}
