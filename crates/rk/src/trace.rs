use std::sync::OnceLock;

use rk_spy::PayloadBuilder;
pub use rk_spy::{TraceError, TraceHook};

use crate::sync::Arc;

/// Shared slot for the trace hook.
///
/// Queues and pools are created while the system is still being declared, so
/// they hold a clone of this slot and pick up the hook once it is installed.
#[derive(Clone, Default)]
pub(crate) struct Spy {
    hook: Arc<OnceLock<TraceHook>>,
}

impl Spy {
    pub(crate) fn install(&self, hook: TraceHook) -> bool {
        self.hook.set(hook).is_ok()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.hook.get().is_some()
    }

    /// Emits a timestamped record whose payload is filled in by `build`.
    ///
    /// The payload is only built when a hook is installed.
    pub(crate) fn emit<F>(&self, record: u8, build: F)
    where
        F: FnOnce(&mut PayloadBuilder),
    {
        if let Some(hook) = self.hook.get() {
            let mut payload = PayloadBuilder::with_capacity(16);
            build(&mut payload);
            if let Err(err) = hook(record, payload.as_slice(), true) {
                log::trace!("trace record {record} lost: {err}");
            }
        }
    }
}
