//! Engine configuration

use std::time::Duration;

use rquickjs::Runtime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BridgeError;

/// Resource name used for scripts executed without one.
pub const DEFAULT_RESOURCE_NAME: &str = "<anonymous>";

/// Tunables applied when an engine is created.
///
/// Every field is optional in JSON; missing fields keep their defaults.
///
/// ```
/// use jsbridge::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{"memory_limit": 16777216}"#).unwrap();
/// assert_eq!(config.memory_limit, Some(16 * 1024 * 1024));
/// assert!(!config.report_failed_sets);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Heap limit in bytes. `None` leaves the engine unbounded.
    pub memory_limit: Option<usize>,
    /// Native stack budget in bytes for script execution.
    pub max_stack_size: Option<usize>,
    /// Allocation volume that triggers a collection cycle.
    pub gc_threshold: Option<usize>,
    /// Wall-clock limit for a single execute or invoke, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Return error values from failed global/property sets instead of null.
    pub report_failed_sets: bool,
    /// Name scripts are compiled under when the host gives none.
    pub default_resource_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: None,
            gc_threshold: None,
            timeout_ms: None,
            report_failed_sets: false,
            default_resource_name: DEFAULT_RESOURCE_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Push the runtime limits into `runtime`.
    pub fn apply(&self, runtime: &Runtime) {
        if let Some(limit) = self.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = self.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = self.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        debug!(
            memory_limit = ?self.memory_limit,
            max_stack_size = ?self.max_stack_size,
            gc_threshold = ?self.gc_threshold,
            timeout_ms = ?self.timeout_ms,
            "engine configured"
        );
    }
}
