//! Engine configuration

use std::time::Duration;

/// Run-wide settings for a [`Dag`](crate::Dag)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagConfig {
    /// Deadline for operator nodes that carry no timeout of their own
    pub default_timeout: Option<Duration>,
    /// Log node lifecycle events at `info` instead of `debug`
    pub verbose: bool,
}

impl DagConfig {
    /// Creates a config with no default timeout and quiet logging
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback node deadline, a zero duration disables it
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Enables info-level node logging
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }
}
