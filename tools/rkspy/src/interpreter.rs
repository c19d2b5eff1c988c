use std::collections::HashMap;

use rk_spy::records::{self, action, info, pool, queue, sched, timer};
use rk_spy::{Field, SpyFrame};

/// Families of records, used for colouring and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordGroup {
    Action,
    Timer,
    Queue,
    Pool,
    Scheduler,
    Info,
    User,
}

impl RecordGroup {
    pub fn of(record_type: u8) -> Self {
        match record_type {
            action::DISPATCH | action::STATUS | action::DROPPED | action::DEFERRED => Self::Action,
            timer::TICK | timer::COALESCED => Self::Timer,
            queue::POST | queue::FULL | queue::GET => Self::Queue,
            pool::GET | pool::PUT | pool::EXHAUSTED => Self::Pool,
            sched::NEXT | sched::IDLE => Self::Scheduler,
            info::OBJ_DICT | info::STARTED => Self::Info,
            _ => Self::User,
        }
    }

    /// Parses a filter name given on the command line.
    pub fn parse(name: &str) -> Option<Self> {
        let group = match name.to_lowercase().as_str() {
            "act" | "action" => Self::Action,
            "tmr" | "timer" => Self::Timer,
            "eq" | "queue" => Self::Queue,
            "mp" | "pool" => Self::Pool,
            "sched" | "scheduler" => Self::Scheduler,
            "info" => Self::Info,
            "user" => Self::User,
            _ => return None,
        };
        Some(group)
    }
}

/// One decoded, human-readable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub seq: u8,
    pub timestamp_us: Option<u32>,
    pub group: RecordGroup,
    pub name: &'static str,
    pub text: String,
}

/// Translates frames into text while tracking the component dictionary.
#[derive(Debug, Default)]
pub struct FrameInterpreter {
    components: HashMap<u16, String>,
}

impl FrameInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interpret(&mut self, frame: &SpyFrame) -> Line {
        let text = match frame.fields() {
            Ok(fields) => self
                .describe(frame.record_type, &fields)
                .unwrap_or_else(|| join(&fields)),
            Err(_) => hex_bytes(&frame.payload),
        };
        Line {
            seq: frame.seq,
            timestamp_us: frame.timestamp_us,
            group: RecordGroup::of(frame.record_type),
            name: records::name(frame.record_type),
            text,
        }
    }

    /// Name recorded for a component id, if a dictionary entry was seen.
    pub fn component(&self, id: u16) -> Option<&str> {
        self.components.get(&id).map(String::as_str)
    }

    fn describe(&mut self, record_type: u8, fields: &[Field]) -> Option<String> {
        use Field::*;

        let text = match (record_type, fields) {
            (info::OBJ_DICT, [U16(id), Str(name)]) => {
                self.components.insert(*id, name.clone());
                format!("{id}->{name}")
            }
            (info::STARTED, [U16(tasks), U16(handlers), U16(sources)]) => {
                format!("tasks={tasks} handlers={handlers} sources={sources}")
            }
            (action::DISPATCH, [U16(id), U16(trigger)]) => {
                format!("{} trigger={trigger}", self.label(*id))
            }
            (action::STATUS, [U16(id), U8(1), _]) => format!("{} success", self.label(*id)),
            (action::STATUS, [U16(id), U8(_), I32(code)]) => {
                format!("{} failure={code}", self.label(*id))
            }
            (action::DROPPED, [U16(u16::MAX), U16(trigger)]) => {
                format!("handler trigger={trigger} (park full)")
            }
            (action::DROPPED, [U16(id), U16(trigger)]) => {
                format!("{} trigger={trigger}", self.label(*id))
            }
            (timer::TICK, [U16(source), U32(missed)]) => format!("src={source} missed={missed}"),
            (timer::COALESCED, [U16(id), U32(missed)]) => {
                format!("{} missed={missed}", self.label(*id))
            }
            (queue::POST | queue::GET, [U16(queue), U16(len)]) => format!("q={queue} len={len}"),
            (queue::FULL, [U16(queue), U16(capacity)]) => format!("q={queue} cap={capacity}"),
            (pool::GET, [U16(pool), U16(free), U16(min)]) => {
                format!("mp={pool} free={free} min={min}")
            }
            (pool::PUT, [U16(pool), U16(free)]) => format!("mp={pool} free={free}"),
            (pool::EXHAUSTED, [U16(pool)]) => format!("mp={pool}"),
            (sched::NEXT, [U8(next), U8(prev)]) => format!("prio={next} prev={prev}"),
            (sched::IDLE, [U8(prev)]) => format!("prev={prev}"),
            _ => return None,
        };
        Some(text)
    }

    fn label(&self, id: u16) -> String {
        match self.component(id) {
            Some(name) => name.to_owned(),
            None => format!("#{id}"),
        }
    }
}

fn join(fields: &[Field]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
