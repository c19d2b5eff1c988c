//! Canonical record identifiers shared across the workspace.
//!
//! Ids occupy the low seven bits of the record byte; the high bit is
//! [`TIMESTAMP_MARK`].

/// Set on the record byte of frames that carry a 4-byte timestamp.
pub const TIMESTAMP_MARK: u8 = 0x80;

/// Action dispatch records.
pub mod action {
    /// An action is about to run: component id, trigger id.
    pub const DISPATCH: u8 = 8;
    /// An action returned: component id, success flag, failure code.
    pub const STATUS: u8 = 9;
    /// A pending activation was dropped because the task backlog was full.
    pub const DROPPED: u8 = 10;
    /// A handler activation was parked behind an action in progress.
    pub const DEFERRED: u8 = 11;
}

/// Periodic source records.
pub mod timer {
    /// A periodic source fired: source id, elapsed periods.
    pub const TICK: u8 = 37;
    /// A tick was folded into an activation that had not run yet.
    pub const COALESCED: u8 = 38;
}

/// Message queue records.
pub mod queue {
    /// Item accepted: queue id, occupancy after the send.
    pub const POST: u8 = 40;
    /// Send rejected on a full queue: queue id, capacity.
    pub const FULL: u8 = 41;
    /// Item handed to the consumer action: queue id, occupancy after the pop.
    pub const GET: u8 = 42;
}

/// Memory pool records.
pub mod pool {
    /// Block allocated: pool id, free blocks, minimum free blocks.
    pub const GET: u8 = 45;
    /// Block returned: pool id, free blocks.
    pub const PUT: u8 = 46;
    /// Allocation failed: pool id.
    pub const EXHAUSTED: u8 = 47;
}

/// Scheduler records.
pub mod sched {
    /// Scheduler switched to a new task: new priority, previous priority.
    pub const NEXT: u8 = 52;
    /// Scheduler went idle: previous priority.
    pub const IDLE: u8 = 53;
}

/// Dictionary and startup records.
pub mod info {
    /// Component dictionary entry: id, name.
    pub const OBJ_DICT: u8 = 61;
    /// Kernel started: component counts.
    pub const STARTED: u8 = 64;
}

/// Human-readable name for a record id, used by host tools.
pub fn name(record_type: u8) -> &'static str {
    match record_type & !TIMESTAMP_MARK {
        action::DISPATCH => "ACT_DISPATCH",
        action::STATUS => "ACT_STATUS",
        action::DROPPED => "ACT_DROPPED",
        action::DEFERRED => "ACT_DEFERRED",
        timer::TICK => "TMR_TICK",
        timer::COALESCED => "TMR_COALESCED",
        queue::POST => "EQ_POST",
        queue::FULL => "EQ_FULL",
        queue::GET => "EQ_GET",
        pool::GET => "MP_GET",
        pool::PUT => "MP_PUT",
        pool::EXHAUSTED => "MP_EXHAUSTED",
        sched::NEXT => "SCHED_NEXT",
        sched::IDLE => "SCHED_IDLE",
        info::OBJ_DICT => "OBJ_DICT",
        info::STARTED => "STARTED",
        _ => "UNKNOWN",
    }
}
