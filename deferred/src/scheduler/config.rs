//! Scheduler configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::heap::DEFAULT_CAPACITY;

/// HeapScheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker thread name; `heap-scheduler-<n>` when unset
    #[serde(default)]
    pub name: Option<String>,

    /// Heap slots reserved up front
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

fn default_initial_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: None,
            initial_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Config with an explicit worker name
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(%name, "SchedulerConfig::named: called");
        Self {
            name: Some(name),
            ..Default::default()
        }
    }
}
