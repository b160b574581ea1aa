//! Pool sizing documents and the sizing formula

use std::io::Write;

use proptest::prelude::*;
use switchboard::{
    compute_entries, pools::config::MIN_PAYLOAD_SIZE, AllocatorConfig, BusError, PoolAllocator,
    PoolConfig, PoolId, MAX_MESSAGE_SIZE, TARGET_COUNT,
};
use tempfile::{NamedTempFile, TempDir};

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_full_document_applied() {
        let file = write_config(
            r#"{ "pools": {
                "streaming": { "F": 0.5, "C": 3, "payload_size": 256,
                               "min_entries": 4, "max_entries": 64 },
                "control":   { "F": 0.1, "C": 1, "payload_size": 64,
                               "min_entries": 2, "max_entries": 16 } } }"#,
        );
        let mut config = AllocatorConfig::default();
        config.load(file.path()).unwrap();

        assert_eq!(config.streaming.fraction, 0.5);
        assert_eq!(config.streaming.credit, 3);
        assert_eq!(config.streaming.payload_size, 256);
        // ceil(17 * 0.5 * 3) = 26
        assert_eq!(config.streaming.entries(), 26);
        // ceil(17 * 0.1) = 2
        assert_eq!(config.control.entries(), 2);

        let alloc = PoolAllocator::init(&config).unwrap();
        assert_eq!(alloc.pool(PoolId::Streaming).capacity(), 26);
        assert_eq!(alloc.payload_size(PoolId::Control), 64);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let file = write_config(r#"{ "pools": { "control": { "C": 4 } } }"#);
        let mut config = AllocatorConfig::default();
        config.load(file.path()).unwrap();

        assert_eq!(config.streaming, PoolConfig::default());
        assert_eq!(config.control.credit, 4);
        assert_eq!(config.control.fraction, 0.25);
        assert_eq!(config.control.payload_size, 128);
    }

    #[test]
    fn test_out_of_range_values_validated() {
        let file = write_config(
            r#"{ "pools": { "streaming": { "F": 3.5, "C": 0, "payload_size": 4,
                                           "min_entries": 0, "max_entries": 2 } } }"#,
        );
        let mut config = AllocatorConfig::default();
        config.load(file.path()).unwrap();

        let streaming = config.streaming;
        assert_eq!(streaming.fraction, 1.0);
        assert_eq!(streaming.credit, 1);
        // Too small keeps the previous width
        assert_eq!(streaming.payload_size, 128);
        assert_eq!(streaming.min_entries, 8);
        // Below min keeps the previous bound
        assert_eq!(streaming.max_entries, 512);
        assert!(streaming.validate().is_ok());
    }

    #[test]
    fn test_oversized_payload_capped() {
        let file = write_config(r#"{ "pools": { "control": { "payload_size": 4096 } } }"#);
        let mut config = AllocatorConfig::default();
        config.load(file.path()).unwrap();
        assert_eq!(config.control.payload_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_wrong_types_treated_as_missing() {
        let file = write_config(r#"{ "pools": { "streaming": { "F": "high", "C": [2] } } }"#);
        let mut config = AllocatorConfig::default();
        config.load(file.path()).unwrap();
        assert_eq!(config.streaming, PoolConfig::default());
    }

    #[test]
    fn test_missing_file_leaves_config_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        let custom = AllocatorConfig::default()
            .with_pool(PoolId::Control, PoolConfig::fixed(3, 32));
        let mut config = custom;

        let err = config.load(&path).unwrap_err();
        assert!(matches!(err, BusError::ConfigMissing { .. }));
        assert!(err.is_recoverable());
        assert_eq!(config, custom);

        assert_eq!(AllocatorConfig::load_or_default(&path), AllocatorConfig::default());
    }

    #[test]
    fn test_malformed_document_rejected() {
        let file = write_config(r#"{ "pools": { "streaming": { "F": 0.5, "#);
        let mut config = AllocatorConfig::default();
        let err = config.load(file.path()).unwrap_err();
        assert!(matches!(err, BusError::Serialization { .. }));
        assert_eq!(config, AllocatorConfig::default());
        assert_eq!(AllocatorConfig::load_or_default(file.path()), AllocatorConfig::default());
    }

    #[test]
    fn test_empty_document_is_noop() {
        let mut config = AllocatorConfig::default();
        config.load_str("{}").unwrap();
        assert_eq!(config, AllocatorConfig::default());
    }

    #[test]
    fn test_strict_validation() {
        assert!(PoolConfig::default().with_fraction(1.5).validate().is_err());
        assert!(PoolConfig::default().with_credit(0).validate().is_err());
        assert!(PoolConfig::default()
            .with_payload_size(MIN_PAYLOAD_SIZE - 1)
            .validate()
            .is_err());
        assert!(PoolConfig::default().with_entries(10, 5).validate().is_err());
    }

    proptest! {
        #[test]
        fn entries_within_bounds(
            fraction in 0.0f64..=1.0,
            credit in 1u32..64,
            min_entries in 1usize..600,
            spread in 0usize..600,
        ) {
            let max_entries = min_entries + spread;
            let entries = compute_entries(TARGET_COUNT, fraction, credit, min_entries, max_entries);
            prop_assert!(entries >= 1);
            prop_assert!(entries >= min_entries);
            prop_assert!(entries <= max_entries);
        }

        #[test]
        fn sanitized_configs_always_build(
            fraction in -2.0f64..3.0,
            credit in 0u32..8,
            payload in 0usize..2048,
            min_entries in 0usize..16,
            max_entries in 0usize..32,
        ) {
            let config = PoolConfig {
                fraction,
                credit,
                payload_size: payload,
                min_entries,
                max_entries,
            }
            .sanitized();
            prop_assert!(config.validate().is_ok());
            let entries = config.entries();
            prop_assert!(entries >= config.min_entries.max(1));
            prop_assert!(entries <= config.max_entries);
        }
    }
}
