use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::qos::backoff::{BackoffStrategy, ExponentialBackoff, LinearBackoff};
use crate::qos::{QosLevel, ReliableOptions};
use crate::session::offline::{
    OfflineLimits, MAX_QUEUE_SIZE_PER_SESSION, MAX_TOTAL_QUEUED_MESSAGES, MESSAGE_TTL_MS,
};

/// Top-level configuration for the Photon runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listener address for WebSocket upgrades.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Idle sockets are closed after this many seconds without traffic.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Maximum accepted WebSocket message size.
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
    /// Handler worker concurrency; 0 selects the host parallelism.
    #[serde(default)]
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_level")]
    pub level: QosLevel,
    #[serde(default = "default_base_retry_ms")]
    pub base_retry_ms: u64,
    /// 0 = unbounded retries.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,
    #[serde(default = "default_duplicate_ttl_ms")]
    pub duplicate_ttl_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,
    #[serde(default)]
    pub enable_compression: bool,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    #[serde(default = "default_max_send_queue")]
    pub max_send_queue_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_queue_per_session")]
    pub max_queue_per_session: usize,
    #[serde(default = "default_total_queued")]
    pub max_total_queued: usize,
    #[serde(default = "default_message_ttl_ms")]
    pub message_ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// tracing filter directive, overridable via RUST_LOG.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind() -> String {
    "0.0.0.0:9000".to_string()
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_max_payload() -> usize {
    1024 * 1024
}
fn default_level() -> QosLevel {
    QosLevel::None
}
fn default_base_retry_ms() -> u64 {
    100
}
fn default_max_retry() -> u32 {
    3
}
fn default_max_backoff_ms() -> u64 {
    1_000
}
fn default_session_ttl_ms() -> u64 {
    15 * 60 * 1_000
}
fn default_duplicate_ttl_ms() -> u64 {
    5_000
}
fn default_backoff() -> BackoffKind {
    BackoffKind::Exponential
}
fn default_compression_threshold() -> usize {
    1_024
}
fn default_max_send_queue() -> usize {
    1_000
}
fn default_queue_per_session() -> usize {
    MAX_QUEUE_SIZE_PER_SESSION
}
fn default_total_queued() -> usize {
    MAX_TOTAL_QUEUED_MESSAGES
}
fn default_message_ttl_ms() -> u64 {
    MESSAGE_TTL_MS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            idle_timeout_secs: default_idle_timeout(),
            max_payload_bytes: default_max_payload(),
            workers: 0,
        }
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            base_retry_ms: default_base_retry_ms(),
            max_retry: default_max_retry(),
            max_backoff_ms: default_max_backoff_ms(),
            session_ttl_ms: default_session_ttl_ms(),
            duplicate_ttl_ms: default_duplicate_ttl_ms(),
            backoff: default_backoff(),
            enable_compression: false,
            compression_threshold_bytes: default_compression_threshold(),
            max_send_queue_size: default_max_send_queue(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_queue_per_session: default_queue_per_session(),
            max_total_queued: default_total_queued(),
            message_ttl_ms: default_message_ttl_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid server.bind {}", self.server.bind))?;
        if self.reliability.base_retry_ms == 0 {
            bail!("reliability.base_retry_ms must be positive");
        }
        if self.reliability.max_backoff_ms < self.reliability.base_retry_ms {
            bail!("reliability.max_backoff_ms must be >= base_retry_ms");
        }
        if self.reliability.duplicate_ttl_ms == 0 {
            bail!("reliability.duplicate_ttl_ms must be positive");
        }
        if self.reliability.max_send_queue_size == 0 {
            bail!("reliability.max_send_queue_size must be positive");
        }
        if self.session.max_queue_per_session == 0 || self.session.max_total_queued == 0 {
            bail!("session queue limits must be positive");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.bind.parse()?)
    }

    pub fn offline_limits(&self) -> OfflineLimits {
        OfflineLimits {
            per_session: self.session.max_queue_per_session,
            total: self.session.max_total_queued,
            message_ttl_ms: self.session.message_ttl_ms,
        }
    }
}

impl ReliabilityConfig {
    /// Materializes the immutable runtime options, including the selected
    /// backoff strategy.
    pub fn to_options(&self) -> ReliableOptions {
        let base = Duration::from_millis(self.base_retry_ms);
        let max = Duration::from_millis(self.max_backoff_ms);
        let backoff: Arc<dyn BackoffStrategy> = match self.backoff {
            BackoffKind::Linear => Arc::new(LinearBackoff::new(base, max)),
            BackoffKind::Exponential => Arc::new(ExponentialBackoff::new(base, max)),
        };
        ReliableOptions {
            level: self.level,
            base_retry_ms: self.base_retry_ms,
            max_retry: self.max_retry,
            max_backoff_ms: self.max_backoff_ms,
            session_ttl_ms: self.session_ttl_ms,
            duplicate_ttl_ms: self.duplicate_ttl_ms,
            backoff,
            enable_compression: self.enable_compression,
            compression_threshold_bytes: self.compression_threshold_bytes,
            max_send_queue_size: self.max_send_queue_size,
        }
    }
}
