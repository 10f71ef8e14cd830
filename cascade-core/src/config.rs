//! Runtime Configuration
//!
//! Tunables for the per-thread reactive runtime. Configuration can be built
//! in code or loaded from JSON; missing fields take their defaults.

use serde::{Deserialize, Serialize};

/// Default bound on settle rounds, see [`RuntimeConfig::max_settle_rounds`].
pub const DEFAULT_MAX_SETTLE_ROUNDS: usize = 100;

/// Configuration for a thread's reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many rounds a single settle phase may run.
    ///
    /// Effects that write signals schedule another round. A settle phase
    /// that is still producing work after this many rounds is aborted with
    /// `ReactiveError::SettleLimitExceeded`.
    pub max_settle_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_settle_rounds: DEFAULT_MAX_SETTLE_ROUNDS,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_max_settle_rounds(mut self, rounds: usize) -> Self {
        self.max_settle_rounds = rounds.max(1);
        self
    }
}
