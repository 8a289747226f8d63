//! Session tuning owned by the session domain.

use crate::protocol::DEFAULT_MAX_FRAME_BYTES;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for generation sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Malformed frames tolerated per session before it fails
    #[serde(default = "default_max_malformed_frames")]
    pub max_malformed_frames: usize,

    /// Largest frame buffered while waiting for a delimiter
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Fail the session when no chunk arrives for this long (None disables)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: Option<u64>,

    /// Retries for opening the transport; no bytes have been consumed yet
    #[serde(default = "default_max_open_retries")]
    pub max_open_retries: usize,

    /// Delay between open retries (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_malformed_frames() -> usize {
    16
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_idle_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_max_open_retries() -> usize {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_frame_bytes == 0 {
            return Err("max_frame_bytes must be greater than zero".to_string());
        }
        if self.idle_timeout_ms == Some(0) {
            return Err("idle_timeout_ms must be greater than zero when set".to_string());
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_malformed_frames: default_max_malformed_frames(),
            max_frame_bytes: default_max_frame_bytes(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_open_retries: default_max_open_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}
