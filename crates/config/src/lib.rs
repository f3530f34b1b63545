//! ISPC Configuration Module
//!
//! This module provides configuration types for the ISPC execution layer:
//! chain identity, asynchronous trace recording, asynchronous ZK-proof
//! generation, context-lifecycle knobs and clock selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Size of an account address in bytes
pub const ADDRESS_SIZE: usize = 20;
/// Size of a SHA-256 digest in bytes
pub const HASH_SIZE: usize = 32;

/// Default chain identifier
pub const DEFAULT_CHAIN_ID: &str = "weisyn-mainnet";

/// Default interval between expired-context sweeps
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 5_000;
/// Default age after which destroyed-context tracking records are dropped
pub const DEFAULT_TRACKING_MAX_AGE_MS: u64 = 3_600_000;
/// Default lifetime after which an undestroyed context counts as leaked
pub const DEFAULT_MAX_CONTEXT_LIFETIME_MS: u64 = 3_600_000;

/// Default number of trace workers
pub const DEFAULT_TRACE_WORKERS: usize = 2;
/// Default trace batch size
pub const DEFAULT_TRACE_BATCH_SIZE: usize = 100;
/// Default trace batch timeout in milliseconds
pub const DEFAULT_TRACE_BATCH_TIMEOUT_MS: u64 = 100;
/// Default number of retries for a failed trace write
pub const DEFAULT_TRACE_MAX_RETRIES: u32 = 3;
/// Default delay between trace write retries in milliseconds
pub const DEFAULT_TRACE_RETRY_DELAY_MS: u64 = 10;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing the configuration file failed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configured value is out of range or inconsistent
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Clock flavor used by the execution layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    /// Operating-system wall clock
    #[default]
    System,
    /// System clock corrected by an externally supplied NTP offset
    Ntp,
    /// System clock corrected by an externally supplied roughtime offset
    Roughtime,
    /// Fixed epoch base, advanced only by explicit calls
    Deterministic,
}

impl fmt::Display for ClockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockKind::System => write!(f, "system"),
            ClockKind::Ntp => write!(f, "ntp"),
            ClockKind::Roughtime => write!(f, "roughtime"),
            ClockKind::Deterministic => write!(f, "deterministic"),
        }
    }
}

impl FromStr for ClockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(ClockKind::System),
            "ntp" => Ok(ClockKind::Ntp),
            "roughtime" => Ok(ClockKind::Roughtime),
            "deterministic" | "fixed" => Ok(ClockKind::Deterministic),
            _ => Err(format!("Unknown clock kind: {}", s)),
        }
    }
}

/// Clock configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClockConfig {
    /// Which clock flavor to construct
    pub kind: ClockKind,
    /// RFC 3339 epoch base for the deterministic clock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch_base: Option<String>,
    /// Correction offset applied by the ntp/roughtime flavors, milliseconds
    pub offset_ms: i64,
}

/// Asynchronous trace-recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncTraceConfig {
    /// Whether trace records are routed through the shared queue
    pub enabled: bool,
    /// Number of drain workers
    pub workers: usize,
    /// Maximum records per drained batch
    pub batch_size: usize,
    /// How long a worker waits on an empty queue, milliseconds
    #[serde(rename = "batch_timeout")]
    pub batch_timeout_ms: u64,
    /// Retries for a failed trace write before the batch is dropped
    pub max_retries: u32,
    /// Delay between retries, milliseconds
    #[serde(rename = "retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for AsyncTraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: DEFAULT_TRACE_WORKERS,
            batch_size: DEFAULT_TRACE_BATCH_SIZE,
            batch_timeout_ms: DEFAULT_TRACE_BATCH_TIMEOUT_MS,
            max_retries: DEFAULT_TRACE_MAX_RETRIES,
            retry_delay_ms: DEFAULT_TRACE_RETRY_DELAY_MS,
        }
    }
}

/// Asynchronous ZK-proof generation configuration
///
/// Consumed by the proof generator that sits downstream of finalized traces;
/// the execution core only carries the knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncZkProofConfig {
    /// Whether proofs are generated asynchronously
    pub enabled: bool,
    /// Number of proof workers
    pub workers: usize,
    /// Lower bound for adaptive worker scaling
    pub min_workers: usize,
    /// Upper bound for adaptive worker scaling
    pub max_workers: usize,
}

impl Default for AsyncZkProofConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: 2,
            min_workers: 1,
            max_workers: 8,
        }
    }
}

/// ISPC execution-layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IspcConfig {
    /// Interval between expired-context sweeps, milliseconds
    pub cleanup_interval_ms: u64,
    /// Age after which destroyed-context tracking records are dropped, milliseconds
    pub tracking_max_age_ms: u64,
    /// Lifetime after which an undestroyed context counts as leaked, milliseconds
    pub max_context_lifetime_ms: u64,
    /// Clock selection
    pub clock: ClockConfig,
    /// Asynchronous ZK-proof generation
    pub async_zk_proof: AsyncZkProofConfig,
    /// Asynchronous trace recording
    pub async_trace: AsyncTraceConfig,
}

impl Default for IspcConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            tracking_max_age_ms: DEFAULT_TRACKING_MAX_AGE_MS,
            max_context_lifetime_ms: DEFAULT_MAX_CONTEXT_LIFETIME_MS,
            clock: ClockConfig::default(),
            async_zk_proof: AsyncZkProofConfig::default(),
            async_trace: AsyncTraceConfig::default(),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecutionConfig {
    /// ISPC execution-layer settings
    pub ispc: IspcConfig,
}

/// Top-level blockchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// Chain identifier surfaced to contracts
    pub chain_id: String,
    /// Execution-layer settings
    pub execution: ExecutionConfig,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl BlockchainConfig {
    /// Parses a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file on disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ispc = &self.execution.ispc;
        if self.chain_id.is_empty() {
            return Err(ConfigError::Invalid("chain_id must not be empty".into()));
        }
        if ispc.async_trace.workers == 0 {
            return Err(ConfigError::Invalid(
                "async_trace.workers must be at least 1".into(),
            ));
        }
        if ispc.async_trace.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "async_trace.batch_size must be at least 1".into(),
            ));
        }
        if ispc.async_zk_proof.min_workers > ispc.async_zk_proof.max_workers {
            return Err(ConfigError::Invalid(
                "async_zk_proof.min_workers must not exceed max_workers".into(),
            ));
        }
        if ispc.cleanup_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "cleanup_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BlockchainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_id, DEFAULT_CHAIN_ID);
        assert!(!config.execution.ispc.async_trace.enabled);
        assert_eq!(config.execution.ispc.async_trace.batch_size, 100);
        assert_eq!(config.execution.ispc.async_trace.batch_timeout_ms, 100);
        assert_eq!(config.execution.ispc.async_trace.max_retries, 3);
        assert_eq!(config.execution.ispc.async_trace.retry_delay_ms, 10);
    }

    #[test]
    fn parses_nested_toml_keys() {
        let raw = r#"
            chain_id = "weisyn-testnet"

            [execution.ispc]
            cleanup_interval_ms = 1000
            tracking_max_age_ms = 60000
            max_context_lifetime_ms = 120000

            [execution.ispc.async_trace]
            enabled = true
            workers = 4
            batch_size = 50
            batch_timeout = 25
            max_retries = 5
            retry_delay = 2

            [execution.ispc.async_zk_proof]
            enabled = true
            workers = 2
            min_workers = 1
            max_workers = 4

            [execution.ispc.clock]
            kind = "deterministic"
            epoch_base = "2025-01-01T00:00:00Z"
            offset_ms = 0
        "#;
        let config = BlockchainConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.chain_id, "weisyn-testnet");
        assert!(config.execution.ispc.async_trace.enabled);
        assert_eq!(config.execution.ispc.async_trace.workers, 4);
        assert_eq!(config.execution.ispc.async_trace.batch_size, 50);
        assert_eq!(config.execution.ispc.clock.kind, ClockKind::Deterministic);
        assert_eq!(
            config.execution.ispc.clock.epoch_base.as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = BlockchainConfig::default();
        config.execution.ispc.async_trace.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_proof_worker_bounds() {
        let mut config = BlockchainConfig::default();
        config.execution.ispc.async_zk_proof.min_workers = 9;
        config.execution.ispc.async_zk_proof.max_workers = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn clock_kind_round_trips_through_strings() {
        for kind in [
            ClockKind::System,
            ClockKind::Ntp,
            ClockKind::Roughtime,
            ClockKind::Deterministic,
        ] {
            assert_eq!(kind.to_string().parse::<ClockKind>().unwrap(), kind);
        }
        assert!("lamport".parse::<ClockKind>().is_err());
    }
}
