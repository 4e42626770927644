//! Sync engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::MAX_ATTEMPTS;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Debounce window for coalesced chapter toggles, milliseconds.
    pub debounce_ms: u64,
    /// Per-item attempt ceiling before parking as failed.
    pub max_attempts: u32,
    /// Snapshot buffer per stats subscriber.
    pub stats_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5_000,
            max_attempts: MAX_ATTEMPTS,
            stats_buffer: 32,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce_ms, 5_000);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{ "debounce_ms": 100 }"#).unwrap();
        assert_eq!(config.debounce_ms, 100);
        assert_eq!(config.max_attempts, MAX_ATTEMPTS);
    }
}
