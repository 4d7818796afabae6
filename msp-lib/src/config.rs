use crate::constants::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tunables for one link. All timeouts are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinkConfig {
    /// Adaptive timeout window before any latency has been observed.
    pub initial_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Initial capacity of the framed read buffer.
    pub read_buffer_size: usize,
    /// Capacity of the command channel into the link task.
    pub command_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: DEFAULT_TIMEOUT_MS,
            min_timeout_ms: MIN_TIMEOUT_MS,
            max_timeout_ms: MAX_TIMEOUT_MS,
            read_buffer_size: 1024,
            command_buffer: 64,
        }
    }
}

impl LinkConfig {
    /// Clamp a latency sample into the configured window.
    pub fn clamp_timeout(&self, ms: u64) -> u64 {
        ms.clamp(self.min_timeout_ms, self.max_timeout_ms.max(self.min_timeout_ms))
    }

    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.clamp_timeout(self.initial_timeout_ms))
    }
}
