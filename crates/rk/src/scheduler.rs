//! Ready set of task activations and the handler parking lot.
//!
//! Every task owns a FIFO of pending activations. Each activation carries a
//! global arrival number, so selection is "highest priority first, then
//! oldest arrival". Per-trigger limits bound the backlog: a message trigger
//! may hold as many activations as its queue holds items, a tick trigger
//! holds one (later ticks fold into it), an interrupt trigger holds the
//! configured backlog.

use std::collections::VecDeque;

use rk_spy::records;

use crate::event::{ComponentId, Input, Priority};
use crate::sync::Mutex;
use crate::trace::Spy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Activation {
    pub(crate) trigger: u16,
    pub(crate) input: Input,
    seq: u64,
}

pub(crate) struct TaskBacklog {
    id: ComponentId,
    priority: Priority,
    limits: Vec<usize>,
    counts: Vec<usize>,
    pending: VecDeque<Activation>,
    dropped: u64,
}

impl TaskBacklog {
    /// `limits[trigger]` is the most activations that trigger may have
    /// pending at once.
    pub(crate) fn new(id: ComponentId, priority: Priority, limits: Vec<usize>) -> Self {
        let total = limits.iter().sum();
        Self {
            id,
            priority,
            counts: vec![0; limits.len()],
            limits,
            pending: VecDeque::with_capacity(total),
            dropped: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Parked {
    pub(crate) slot: usize,
    pub(crate) trigger: u16,
    pub(crate) input: Input,
}

struct SchedState {
    tasks: Vec<TaskBacklog>,
    parked: VecDeque<Parked>,
    parked_limit: usize,
    parked_dropped: u64,
    next_seq: u64,
    prev_prio: u8,
}

enum Note {
    Coalesced(ComponentId, u32),
    Dropped(ComponentId, u16),
}

pub(crate) struct Scheduler {
    state: Mutex<SchedState>,
    spy: Spy,
}

impl Scheduler {
    pub(crate) fn new(tasks: Vec<TaskBacklog>, parked_limit: usize, spy: Spy) -> Self {
        Self {
            state: Mutex::new(SchedState {
                tasks,
                parked: VecDeque::with_capacity(parked_limit),
                parked_limit,
                parked_dropped: 0,
                next_seq: 0,
                prev_prio: 0,
            }),
            spy,
        }
    }

    /// Appends an activation to a task. Returns `false` when the trigger's
    /// backlog was full and the activation was dropped.
    pub(crate) fn make_ready(&self, slot: usize, trigger: u16, input: Input) -> bool {
        let (accepted, note) = {
            let mut state = self.state.lock();
            let SchedState {
                tasks, next_seq, ..
            } = &mut *state;
            let task = &mut tasks[slot];
            let index = usize::from(trigger);

            let folded = match input {
                Input::Tick(tick) => task
                    .pending
                    .iter_mut()
                    .filter(|pending| pending.trigger == trigger)
                    .find_map(|pending| match &mut pending.input {
                        Input::Tick(prev) => {
                            prev.missed = prev.missed.saturating_add(tick.missed.saturating_add(1));
                            prev.seq = tick.seq;
                            prev.due = tick.due;
                            Some(prev.missed)
                        }
                        _ => None,
                    }),
                _ => None,
            };

            if let Some(missed) = folded {
                (true, Some(Note::Coalesced(task.id, missed)))
            } else if task.counts[index] >= task.limits[index] {
                task.dropped += 1;
                (false, Some(Note::Dropped(task.id, trigger)))
            } else {
                task.counts[index] += 1;
                task.pending.push_back(Activation {
                    trigger,
                    input,
                    seq: *next_seq,
                });
                *next_seq += 1;
                (true, None)
            }
        };

        if let Some(note) = note {
            self.emit_note(note);
        }
        accepted
    }

    /// Removes the activation to run next.
    pub(crate) fn next(&self) -> Option<(usize, Activation)> {
        let mut note = None;
        let picked = {
            let mut state = self.state.lock();
            let mut best: Option<(usize, Priority, u64)> = None;
            for (slot, task) in state.tasks.iter().enumerate() {
                let Some(front) = task.pending.front() else {
                    continue;
                };
                let better = match best {
                    None => true,
                    Some((_, prio, seq)) => {
                        task.priority > prio || (task.priority == prio && front.seq < seq)
                    }
                };
                if better {
                    best = Some((slot, task.priority, front.seq));
                }
            }

            match best {
                Some((slot, prio, _)) => {
                    let task = &mut state.tasks[slot];
                    let activation = task.pending.pop_front();
                    if let Some(activation) = &activation {
                        task.counts[usize::from(activation.trigger)] -= 1;
                    }
                    let prev = state.prev_prio;
                    if prio.raw() != prev {
                        note = Some((records::sched::NEXT, prio.raw(), prev));
                    }
                    state.prev_prio = prio.raw();
                    activation.map(|activation| (slot, activation))
                }
                None => {
                    if state.prev_prio != 0 {
                        note = Some((records::sched::IDLE, state.prev_prio, 0));
                        state.prev_prio = 0;
                    }
                    None
                }
            }
        };

        if let Some((record, a, b)) = note {
            self.spy.emit(record, |p| {
                p.push_u8(a);
                if record == records::sched::NEXT {
                    p.push_u8(b);
                }
            });
        }
        picked
    }

    pub(crate) fn has_ready(&self) -> bool {
        self.state
            .lock()
            .tasks
            .iter()
            .any(|task| !task.pending.is_empty())
    }

    /// Queues a handler activation for the next holder of the execution lock.
    pub(crate) fn park(&self, parked: Parked) -> bool {
        let accepted = {
            let mut state = self.state.lock();
            if state.parked.len() >= state.parked_limit {
                state.parked_dropped += 1;
                false
            } else {
                state.parked.push_back(parked);
                true
            }
        };
        if !accepted {
            log::warn!("handler backlog full, activation dropped");
            self.spy.emit(records::action::DROPPED, |p| {
                p.push_u16(u16::MAX).push_u16(parked.trigger);
            });
        }
        accepted
    }

    pub(crate) fn take_parked(&self) -> Option<Parked> {
        self.state.lock().parked.pop_front()
    }

    pub(crate) fn has_parked(&self) -> bool {
        !self.state.lock().parked.is_empty()
    }

    pub(crate) fn pending(&self, slot: usize) -> usize {
        self.state.lock().tasks[slot].pending.len()
    }

    pub(crate) fn dropped(&self, slot: usize) -> u64 {
        self.state.lock().tasks[slot].dropped
    }

    pub(crate) fn parked_dropped(&self) -> u64 {
        self.state.lock().parked_dropped
    }

    fn emit_note(&self, note: Note) {
        match note {
            Note::Coalesced(id, missed) => {
                log::debug!("tick coalesced into pending activation of component {}", id.0);
                self.spy.emit(records::timer::COALESCED, |p| {
                    p.push_u16(id.0).push_u32(missed);
                });
            }
            Note::Dropped(id, trigger) => {
                log::warn!("component {} backlog full on trigger {trigger}, activation dropped", id.0);
                self.spy.emit(records::action::DROPPED, |p| {
                    p.push_u16(id.0).push_u16(trigger);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::event::{Interrupt, SourceId, Tick};

    fn irq(data: u32) -> Input {
        Input::Interrupt(Interrupt {
            source: SourceId(0),
            data,
        })
    }

    fn tick(seq: u64) -> Input {
        Input::Tick(Tick {
            source: SourceId(1),
            seq,
            missed: 0,
            due: Duration::from_millis(seq * 10),
        })
    }

    #[test]
    fn higher_priority_wins_then_arrival_order() {
        let scheduler = Scheduler::new(
            vec![
                TaskBacklog::new(ComponentId(0), Priority(1), vec![4]),
                TaskBacklog::new(ComponentId(1), Priority(5), vec![4]),
                TaskBacklog::new(ComponentId(2), Priority(1), vec![4]),
            ],
            4,
            Spy::default(),
        );

        scheduler.make_ready(2, 0, irq(1));
        scheduler.make_ready(0, 0, irq(2));
        scheduler.make_ready(1, 0, irq(3));

        let order: Vec<usize> = std::iter::from_fn(|| scheduler.next())
            .map(|(slot, _)| slot)
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn pending_ticks_fold_together() {
        let scheduler = Scheduler::new(
            vec![TaskBacklog::new(ComponentId(0), Priority(1), vec![1])],
            4,
            Spy::default(),
        );

        assert!(scheduler.make_ready(0, 0, tick(1)));
        assert!(scheduler.make_ready(0, 0, tick(2)));
        assert!(scheduler.make_ready(0, 0, tick(3)));
        assert_eq!(scheduler.pending(0), 1);

        let (_, activation) = scheduler.next().unwrap();
        match activation.input {
            Input::Tick(tick) => {
                assert_eq!(tick.seq, 3);
                assert_eq!(tick.missed, 2);
            }
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[test]
    fn interrupt_backlog_overflow_is_dropped() {
        let scheduler = Scheduler::new(
            vec![TaskBacklog::new(ComponentId(0), Priority(1), vec![2])],
            4,
            Spy::default(),
        );

        assert!(scheduler.make_ready(0, 0, irq(1)));
        assert!(scheduler.make_ready(0, 0, irq(2)));
        assert!(!scheduler.make_ready(0, 0, irq(3)));
        assert_eq!(scheduler.dropped(0), 1);

        scheduler.next();
        assert!(scheduler.make_ready(0, 0, irq(4)));
    }
}
