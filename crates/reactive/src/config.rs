//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the live query engine.
///
/// ```
/// use livedoc_reactive::EngineConfig;
///
/// let config = EngineConfig::default().with_dormant_capacity(10);
/// assert_eq!(config.dormant_capacity, 10);
/// assert_eq!(config.eviction_percent, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of dormant queries kept for reuse.
    pub dormant_capacity: usize,
    /// Share of the dormant queue evicted in one pass once it overflows.
    pub eviction_percent: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dormant_capacity: 100,
            eviction_percent: 10,
        }
    }
}

impl EngineConfig {
    pub fn with_dormant_capacity(mut self, capacity: usize) -> Self {
        self.dormant_capacity = capacity;
        self
    }

    pub fn with_eviction_percent(mut self, percent: usize) -> Self {
        self.eviction_percent = percent.min(100);
        self
    }

    /// Number of dormant queries to evict when `len` exceeds the capacity.
    pub fn eviction_batch(&self, len: usize) -> usize {
        if len <= self.dormant_capacity {
            return 0;
        }
        let batch = (len * self.eviction_percent / 100).max(1);
        batch.max(len - self.dormant_capacity)
    }
}
