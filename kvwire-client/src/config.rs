//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via KVWIRE_CONFIG)
//! 3. Environment variables

use crate::connection::{ConnectionOptions, MAX_READ_BUFFER_SIZE, MIN_READ_BUFFER_SIZE};
use crate::dispatch::{DEFAULT_MAX_IN_FLIGHT, MAX_IN_FLIGHT_LIMIT};
use crate::retry::{BestEffortRetryStrategy, FailFastRetryStrategy, RetryStrategy};
use kvwire_protocol::compression::{DEFAULT_MIN_RATIO, DEFAULT_MIN_SIZE};
use kvwire_protocol::{ChannelContext, CompressionConfig, DEFAULT_PORT, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub timeouts: TimeoutConfig,
    pub compression: CompressionSettings,
    pub features: FeatureConfig,
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("KVWIRE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `KVWIRE_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = &lookup;
        self.network.apply_overrides(lookup);
        self.timeouts.apply_overrides(lookup);
        self.compression.apply_overrides(lookup);
        self.features.apply_overrides(lookup);
        self.retry.apply_overrides(lookup);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.timeouts.validate()?;
        self.compression.validate()?;
        self.features.validate()?;
        self.retry.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Feature snapshot for connections built from this configuration.
    pub fn channel_context(&self) -> ChannelContext {
        let mut ctx = ChannelContext::new(self.features.bucket.clone());
        if self.features.collections {
            ctx = ctx.with_collections();
        }
        if self.features.sync_replication {
            ctx = ctx.with_sync_replication();
        }
        if self.features.mutation_tokens {
            ctx = ctx.with_mutation_tokens();
        }
        if let Some(compression) = self.compression.to_compression_config() {
            ctx = ctx.with_compression(compression);
        }
        ctx
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_in_flight: self.network.max_in_flight,
            read_buffer_size: self.network.read_buffer_size,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `host:port` of the key-value service.
    pub address: String,
    pub connect_timeout_ms: u64,
    pub tcp_nodelay: bool,
    /// Maximum outstanding requests per connection.
    pub max_in_flight: usize,
    pub read_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_timeout_ms: 10_000,
            tcp_nodelay: true,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            read_buffer_size: 16 * 1024,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup("KVWIRE_ADDRESS") {
            self.address = address;
        }
        if let Some(ms) = lookup("KVWIRE_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = ms;
        }
        if let Some(flag) = lookup("KVWIRE_TCP_NODELAY").and_then(|v| parse_bool(&v)) {
            self.tcp_nodelay = flag;
        }
        if let Some(n) = lookup("KVWIRE_MAX_IN_FLIGHT").and_then(|v| v.parse().ok()) {
            self.max_in_flight = n;
        }
        if let Some(n) = lookup("KVWIRE_READ_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
            self.read_buffer_size = n;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() {
            return Err(ConfigError::Invalid("network.address is empty".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "network.max_in_flight must be in 1..={}",
                MAX_IN_FLIGHT_LIMIT
            )));
        }
        if !(MIN_READ_BUFFER_SIZE..=MAX_READ_BUFFER_SIZE).contains(&self.read_buffer_size) {
            return Err(ConfigError::Invalid(format!(
                "network.read_buffer_size must be in {}..={}",
                MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Per-request timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub kv_timeout_ms: u64,
    /// Used instead of `kv_timeout_ms` for writes that request durability.
    pub kv_durable_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            kv_timeout_ms: 2_500,
            kv_durable_timeout_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(ms) = lookup("KVWIRE_KV_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.kv_timeout_ms = ms;
        }
        if let Some(ms) = lookup("KVWIRE_KV_DURABLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.kv_durable_timeout_ms = ms;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kv_timeout_ms == 0 || self.kv_durable_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn kv_timeout(&self) -> Duration {
        Duration::from_millis(self.kv_timeout_ms)
    }

    pub fn kv_durable_timeout(&self) -> Duration {
        Duration::from_millis(self.kv_durable_timeout_ms)
    }
}

/// Snappy value compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub min_size: usize,
    pub min_ratio: f64,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: DEFAULT_MIN_SIZE,
            min_ratio: DEFAULT_MIN_RATIO,
        }
    }
}

impl CompressionSettings {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(flag) = lookup("KVWIRE_COMPRESSION").and_then(|v| parse_bool(&v)) {
            self.enabled = flag;
        }
        if let Some(n) = lookup("KVWIRE_COMPRESSION_MIN_SIZE").and_then(|v| v.parse().ok()) {
            self.min_size = n;
        }
        if let Some(r) = lookup("KVWIRE_COMPRESSION_MIN_RATIO").and_then(|v| v.parse().ok()) {
            self.min_ratio = r;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_ratio > 0.0 && self.min_ratio <= 1.0) {
            return Err(ConfigError::Invalid(
                "compression.min_ratio must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// `None` when compression is switched off.
    pub fn to_compression_config(&self) -> Option<CompressionConfig> {
        if !self.enabled {
            return None;
        }
        Some(
            CompressionConfig::default()
                .with_min_size(self.min_size)
                .with_min_ratio(self.min_ratio),
        )
    }
}

/// Protocol features assumed to be negotiated on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub bucket: String,
    pub collections: bool,
    pub sync_replication: bool,
    pub mutation_tokens: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            bucket: "default".to_string(),
            collections: true,
            sync_replication: true,
            mutation_tokens: true,
        }
    }
}

impl FeatureConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(bucket) = lookup("KVWIRE_BUCKET") {
            self.bucket = bucket;
        }
        if let Some(flag) = lookup("KVWIRE_COLLECTIONS").and_then(|v| parse_bool(&v)) {
            self.collections = flag;
        }
        if let Some(flag) = lookup("KVWIRE_SYNC_REPLICATION").and_then(|v| parse_bool(&v)) {
            self.sync_replication = flag;
        }
        if let Some(flag) = lookup("KVWIRE_MUTATION_TOKENS").and_then(|v| parse_bool(&v)) {
            self.mutation_tokens = flag;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::Invalid("features.bucket is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    BestEffort,
    FailFast,
}

/// Retry strategy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: RetryKind,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let best_effort = BestEffortRetryStrategy::default();
        Self {
            strategy: RetryKind::BestEffort,
            max_attempts: best_effort.max_attempts,
            initial_backoff_ms: best_effort.initial_backoff.as_millis() as u64,
            max_backoff_ms: best_effort.max_backoff.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        match lookup("KVWIRE_RETRY_STRATEGY").as_deref() {
            Some("best_effort") => self.strategy = RetryKind::BestEffort,
            Some("fail_fast") => self.strategy = RetryKind::FailFast,
            _ => {}
        }
        if let Some(n) = lookup("KVWIRE_RETRY_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.max_attempts = n;
        }
        if let Some(ms) = lookup("KVWIRE_RETRY_INITIAL_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.initial_backoff_ms = ms;
        }
        if let Some(ms) = lookup("KVWIRE_RETRY_MAX_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.max_backoff_ms = ms;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build_strategy(&self) -> Arc<dyn RetryStrategy> {
        match self.strategy {
            RetryKind::FailFast => Arc::new(FailFastRetryStrategy),
            RetryKind::BestEffort => Arc::new(BestEffortRetryStrategy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            }),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Why a configuration could not be loaded or accepted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.network.address, "127.0.0.1:11210");
        assert_eq!(config.timeouts.kv_timeout(), Duration::from_millis(2500));
        assert_eq!(config.retry.strategy, RetryKind::BestEffort);
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ClientConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "features:\n  bucket: travel\n  collections: false\nretry:\n  strategy: fail_fast\n"
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.features.bucket, "travel");
        assert!(!config.features.collections);
        assert!(config.features.sync_replication);
        assert_eq!(config.retry.strategy, RetryKind::FailFast);
        assert_eq!(config.network, NetworkConfig::default());
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let err = ClientConfig::from_file("/nonexistent/kvwire.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/kvwire.yaml"));
        assert!(std::error::Error::source(&err).is_some());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network: [not, a, map]").unwrap();
        assert!(matches!(
            ClientConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvwire.yaml");
        let mut config = ClientConfig::default();
        config.timeouts.kv_timeout_ms = 750;
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("KVWIRE_ADDRESS", "10.1.2.3:11207"),
            ("KVWIRE_KV_TIMEOUT_MS", "900"),
            ("KVWIRE_COMPRESSION", "off"),
            ("KVWIRE_SYNC_REPLICATION", "false"),
            ("KVWIRE_RETRY_STRATEGY", "fail_fast"),
            ("KVWIRE_MAX_IN_FLIGHT", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.network.address, "10.1.2.3:11207");
        assert_eq!(config.timeouts.kv_timeout_ms, 900);
        assert!(!config.compression.enabled);
        assert!(!config.features.sync_replication);
        assert_eq!(config.retry.strategy, RetryKind::FailFast);
        // unparseable values are ignored
        assert_eq!(config.network.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::default();
        config.compression.min_ratio = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ClientConfig::default();
        config.network.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.retry.initial_backoff_ms = 1000;
        config.retry.max_backoff_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_context() {
        let mut config = ClientConfig::default();
        config.features.bucket = "travel".to_string();
        config.features.mutation_tokens = false;
        config.compression.min_size = 128;

        let ctx = config.channel_context();
        assert_eq!(ctx.bucket_name, "travel");
        assert!(ctx.collections_enabled);
        assert!(ctx.sync_replication_enabled);
        assert!(!ctx.mutation_tokens_enabled);
        assert_eq!(ctx.compression.map(|c| c.min_size), Some(128));

        config.compression.enabled = false;
        assert!(config.channel_context().compression.is_none());
    }
}
