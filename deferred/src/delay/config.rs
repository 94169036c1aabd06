//! Delay coordinator configuration

use serde::{Deserialize, Serialize};

use crate::heap::DEFAULT_CAPACITY;

/// DelayCoordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Heap slots reserved up front; the queue itself is unbounded
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

fn default_initial_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
        }
    }
}
