use std::time::Duration;

use rapwire_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD, DEFAULT_QUANTUM};
use rapwire_pool::PoolConfig;
use serde::{Deserialize, Serialize};

/// Runtime knobs for a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Payloads above this size are split into chunk frames.
    pub quantum: usize,
    /// Hard cap on a single (reassembled) payload.
    pub max_payload_size: usize,
    /// How long `send` blocks for a response before giving up with an
    /// empty payload.
    pub call_timeout: Duration,
    /// Interval between keepalive pings. Zero disables the keepalive
    /// thread entirely.
    pub keepalive_interval: Duration,
    /// How long to wait for a ping echo before declaring the peer dead.
    pub keepalive_timeout: Duration,
    /// Incomplete chunk buffers untouched for this long are discarded.
    pub chunk_stale_after: Duration,
    /// Worker pool sizing for inbound request handling.
    pub pool: PoolConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            call_timeout: Duration::from_secs(15 * 60),
            keepalive_interval: Duration::from_secs(11),
            keepalive_timeout: Duration::from_secs(1),
            chunk_stale_after: Duration::from_secs(60),
            pool: PoolConfig::default(),
        }
    }
}

impl TransportConfig {
    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            quantum: self.quantum,
            max_payload_size: self.max_payload_size,
        }
    }
}

/// Backoff policy for [`Reconnector`](crate::Reconnector).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first redial attempt; doubles on each failure.
    pub initial_backoff: Duration,
    /// Upper bound on the redial delay.
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_from_empty_object() {
        let config: TransportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.call_timeout, Duration::from_secs(900));
        assert_eq!(config.keepalive_interval, Duration::from_secs(11));
        assert_eq!(config.keepalive_timeout, Duration::from_secs(1));
        assert_eq!(config.quantum, DEFAULT_QUANTUM);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"quantum": 4096}"#).unwrap();
        assert_eq!(config.quantum, 4096);
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn reconnect_backoff_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.max_backoff, Duration::from_secs(5));
    }
}
