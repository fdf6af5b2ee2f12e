//! Service configuration.

use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::time::Duration;

/// Default bound on how long disposal waits for queued work.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Subscription service configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// How long disposal waits for the sequencer to drain.
    /// Default: 60s
    pub shutdown_timeout: Duration,

    /// Name of the sequencer worker thread.
    pub sequencer_name: String,

    /// Per-address buffer for the loopback transport.
    /// Default: 1000
    pub mailbox_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            sequencer_name: "subscription-service".to_string(),
            mailbox_capacity: 1000,
        }
    }
}

/// On-disk/JSON form; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    shutdown_timeout_ms: Option<u64>,
    sequencer_name: Option<String>,
    mailbox_capacity: Option<usize>,
}

impl ServiceConfig {
    /// Parse a JSON document, falling back to defaults for missing fields.
    pub fn from_json(input: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_str(input).map_err(|e| SyncError::Config(e.to_string()))?;
        let defaults = Self::default();

        let config = Self {
            shutdown_timeout: raw
                .shutdown_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_timeout),
            sequencer_name: raw.sequencer_name.unwrap_or(defaults.sequencer_name),
            mailbox_capacity: raw.mailbox_capacity.unwrap_or(defaults.mailbox_capacity),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.shutdown_timeout.is_zero() {
            return Err(SyncError::Config("shutdown_timeout must be non-zero".into()));
        }
        if self.sequencer_name.trim().is_empty() {
            return Err(SyncError::Config("sequencer_name must not be empty".into()));
        }
        if self.mailbox_capacity == 0 {
            return Err(SyncError::Config("mailbox_capacity must be non-zero".into()));
        }
        Ok(())
    }
}
