//! Integration tests for configuration serialization round trips.

use ispc_config::{BlockchainConfig, ClockKind};

#[test]
fn default_config_survives_a_toml_round_trip() {
    let config = BlockchainConfig::default();
    let rendered = toml::to_string(&config).unwrap();
    let parsed = BlockchainConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(parsed.chain_id, config.chain_id);
    assert_eq!(
        parsed.execution.ispc.async_trace.batch_size,
        config.execution.ispc.async_trace.batch_size
    );
    assert_eq!(
        parsed.execution.ispc.cleanup_interval_ms,
        config.execution.ispc.cleanup_interval_ms
    );
    assert_eq!(parsed.execution.ispc.clock.kind, ClockKind::System);
}

#[test]
fn wire_key_names_do_not_carry_unit_suffixes() {
    let config = BlockchainConfig::default();
    let rendered = toml::to_string(&config).unwrap();
    assert!(rendered.contains("batch_timeout = "));
    assert!(rendered.contains("retry_delay = "));
    assert!(!rendered.contains("batch_timeout_ms"));
    assert!(!rendered.contains("retry_delay_ms"));
}

#[test]
fn partial_documents_get_defaults_for_the_rest() {
    let config = BlockchainConfig::from_toml_str(
        r#"
            chain_id = "weisyn-devnet"
            [execution.ispc.async_trace]
            enabled = true
            workers = 8
        "#,
    )
    .unwrap();
    assert_eq!(config.chain_id, "weisyn-devnet");
    assert!(config.execution.ispc.async_trace.enabled);
    assert_eq!(config.execution.ispc.async_trace.workers, 8);
    // Everything not mentioned keeps its default.
    assert_eq!(config.execution.ispc.async_trace.batch_size, 100);
    assert_eq!(config.execution.ispc.cleanup_interval_ms, 5_000);
    assert_eq!(config.execution.ispc.clock.kind, ClockKind::System);
}
