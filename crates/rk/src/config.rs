//! Kernel-wide configuration.

#[cfg(feature = "serde")]
use serde::Deserialize;

/// Configuration for the kernel.
///
/// Sizing limits are checked when the system is built; nothing here can
/// change once dispatching starts.
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: String,
    /// Maximum number of task-class components.
    pub max_tasks: u16,
    /// Maximum number of handler-class components.
    pub max_handlers: u16,
    /// Pending interrupt activations kept per (task, interrupt source) pair.
    pub interrupt_backlog: u16,
    /// Handler activations that may wait behind an action in progress.
    pub deferred_handlers: u16,
    /// Emit name dictionary records when the kernel starts.
    pub trace_dictionary: bool,
    /// Called each time `run_until_idle` finds nothing left to run.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub idle_callback: Option<fn()>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "rk".to_owned(),
            max_tasks: 32,
            max_handlers: 16,
            interrupt_backlog: 8,
            deferred_handlers: 16,
            trace_dictionary: true,
            idle_callback: None,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_tasks(mut self, max: u16) -> Self {
        self.config.max_tasks = max;
        self
    }

    pub fn max_handlers(mut self, max: u16) -> Self {
        self.config.max_handlers = max;
        self
    }

    /// Sets how many interrupt activations a task may have pending per source.
    pub fn interrupt_backlog(mut self, depth: u16) -> Self {
        self.config.interrupt_backlog = depth;
        self
    }

    /// Sets how many handler activations may wait behind a running action.
    pub fn deferred_handlers(mut self, depth: u16) -> Self {
        self.config.deferred_handlers = depth;
        self
    }

    pub fn trace_dictionary(mut self, enabled: bool) -> Self {
        self.config.trace_dictionary = enabled;
        self
    }

    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    pub fn build(self) -> KernelConfig {
        self.config
    }
}
