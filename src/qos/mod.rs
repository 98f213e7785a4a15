//! Delivery-guarantee machinery: QoS levels, per-connection state machines,
//! backoff strategies, duplicate suppression, and the retry scheduler.

pub mod backoff;
pub mod conn_state;
pub mod dedupe;
pub mod engine;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use backoff::{BackoffStrategy, ExponentialBackoff};

pub use conn_state::{ConnState, PendingFrame, Qos2Pending, Qos2Stage, SeenWindow};
pub use dedupe::DuplicateFilter;
pub use engine::{FrameSink, Inbound, QosEngine};
pub use scheduler::{RetryScheduler, RetryTarget};

/// Delivery guarantee classes, modeled after MQTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    /// At most once: no ACK expected, no dedup state.
    None,
    /// At least once: ACK and retry.
    AtLeastOnce,
    /// Exactly once: two-phase handshake.
    ExactlyOnce,
}

/// Reliability configuration, built once at startup and shared by reference.
#[derive(Clone)]
pub struct ReliableOptions {
    pub level: QosLevel,
    /// Initial retry delay in milliseconds.
    pub base_retry_ms: u64,
    /// Maximum retry attempts; 0 = unbounded.
    pub max_retry: u32,
    /// Ceiling on any backoff delay.
    pub max_backoff_ms: u64,
    /// Offline retention for sessions.
    pub session_ttl_ms: u64,
    /// Window for both the seen-id set and the payload duplicate filter.
    pub duplicate_ttl_ms: u64,
    pub backoff: Arc<dyn BackoffStrategy>,
    pub enable_compression: bool,
    pub compression_threshold_bytes: usize,
    /// Backpressure hard limit per connection; overflow closes with 1009.
    pub max_send_queue_size: usize,
}

impl Default for ReliableOptions {
    fn default() -> Self {
        Self {
            level: QosLevel::None,
            base_retry_ms: 100,
            max_retry: 3,
            max_backoff_ms: 1_000,
            session_ttl_ms: 15 * 60 * 1_000,
            duplicate_ttl_ms: 5_000,
            backoff: Arc::new(ExponentialBackoff::new(
                Duration::from_millis(100),
                Duration::from_millis(1_000),
            )),
            enable_compression: false,
            compression_threshold_bytes: 1_024,
            max_send_queue_size: 1_000,
        }
    }
}

impl ReliableOptions {
    pub fn duplicate_ttl(&self) -> Duration {
        Duration::from_millis(self.duplicate_ttl_ms)
    }
}
