//! Socket configuration value.

use std::collections::BTreeMap;
use std::time::Duration;

use phx_core::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_SEND_BUFFER_CAPACITY,
    DEFAULT_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// What the send buffer does when it is at capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Fail the submission with a "buffer full" error.
    #[default]
    Reject,
    /// Suspend the submitter until the buffer drains.
    Wait,
}

/// Immutable configuration handed to a socket at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketSettings {
    /// Endpoint URL, e.g. `ws://localhost:4000/socket/websocket`.
    pub endpoint: String,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Fixed reconnect interval in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Default per-push reply timeout in milliseconds.
    pub default_timeout_ms: u64,
    /// Reconnect automatically after a transport failure.
    pub reconnect_on_failure: bool,
    /// Maximum number of frames waiting for the transport.
    pub send_buffer_capacity: usize,
    /// Behaviour when the send buffer is full.
    pub overflow: OverflowPolicy,
    /// Extra query parameters appended to the endpoint.
    pub params: BTreeMap<String, String>,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:4000/socket/websocket".to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            reconnect_on_failure: false,
            send_buffer_capacity: DEFAULT_SEND_BUFFER_CAPACITY,
            overflow: OverflowPolicy::Reject,
            params: BTreeMap::new(),
        }
    }
}

impl SocketSettings {
    /// Defaults with the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = duration_ms(interval);
        self
    }

    /// Set the reconnect interval.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = duration_ms(interval);
        self
    }

    /// Set the default push timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = duration_ms(timeout);
        self
    }

    /// Enable or disable reconnect-on-failure.
    #[must_use]
    pub fn with_reconnect_on_failure(mut self, enabled: bool) -> Self {
        self.reconnect_on_failure = enabled;
        self
    }

    /// Set the send buffer capacity and overflow policy.
    #[must_use]
    pub fn with_send_buffer(mut self, capacity: usize, overflow: OverflowPolicy) -> Self {
        self.send_buffer_capacity = capacity;
        self.overflow = overflow;
        self
    }

    /// Add an endpoint query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.params.insert(key.into(), value.into());
        self
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Reconnect interval.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Default push timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Reject values the socket cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(SettingsError::InvalidValue("endpoint is empty".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalMs must be > 0".into(),
            ));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reconnectIntervalMs must be > 0".into(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "defaultTimeoutMs must be > 0".into(),
            ));
        }
        if self.send_buffer_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "sendBufferCapacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
