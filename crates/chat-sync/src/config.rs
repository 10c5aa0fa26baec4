use std::time::Duration;

use serde::Deserialize;

/// Tunables for a [`crate::ChatSyncEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between a finished initial load and the first polling loop.
    #[serde(default = "default_poll_start_delay_ms")]
    pub poll_start_delay_ms: u64,
    /// `sender_type` value that marks a message as authored by us.
    #[serde(default = "default_self_marker")]
    pub self_marker: String,
    #[serde(default = "default_temp_id_prefix")]
    pub temp_id_prefix: String,
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn poll_start_delay(&self) -> Duration {
        Duration::from_millis(self.poll_start_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_start_delay_ms: default_poll_start_delay_ms(),
            self_marker: default_self_marker(),
            temp_id_prefix: default_temp_id_prefix(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_poll_start_delay_ms() -> u64 {
    1_000
}

fn default_self_marker() -> String {
    "responder".to_string()
}

fn default_temp_id_prefix() -> String {
    "temp-".to_string()
}
