// ABOUTME: Serializable configuration for constructing a gate.
// ABOUTME: Validation is deferred to Gate::from_config.

use serde::{Deserialize, Serialize};

/// Window used when a config omits one.
pub const DEFAULT_WINDOW: usize = 4;

/// Configuration for a [`Gate`](super::Gate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum number of jobs admitted but not yet released.
    pub window: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
        }
    }
}

impl GateConfig {
    /// Create a config with the given window.
    pub fn new(window: usize) -> Self {
        Self { window }
    }
}
