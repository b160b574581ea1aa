//! Error types and handling for switchboard

use std::time::Duration;

/// Result type alias for switchboard operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Error types for the message pools, routing table and module workers
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Configuration file does not exist
    #[error("Config missing: {path}")]
    ConfigMissing { path: String },

    /// A configuration value was rejected
    #[error("Invalid config: {parameter} - {message}")]
    ConfigInvalid { parameter: String, message: String },

    /// I/O related errors (reading the config file)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Config document could not be parsed
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// No free slot in the pool right now
    #[error("Pool exhausted: {pool}")]
    PoolExhausted { pool: String },

    /// No slot became free before the deadline
    #[error("Allocation timed out on {pool} after {timeout_ms}ms")]
    AllocTimeout { pool: String, timeout_ms: u64 },

    /// A target's pointer channel was full
    #[error("Delivery dropped for target {target}")]
    DeliveryDropped { target: String },

    /// A slot was released after it had already returned to its pool
    #[error("Double release of slot {slot} in {pool}")]
    DoubleRelease { pool: String, slot: usize },

    /// A raw slot reference named no slot of its pool
    #[error("Invalid slot {slot}")]
    InvalidSlot { slot: String },

    /// Pool or worker construction failed at bring-up
    #[error("Setup failure: {message}")]
    SetupFailure { message: String },

    /// A routing entry was registered twice
    #[error("{kind} already registered for target {target}")]
    AlreadyRegistered { target: String, kind: String },

    /// A module has no pointer channel to drain
    #[error("No pointer channel for module {module}")]
    MissingChannel { module: String },

    /// Payload does not fit in the slot
    #[error("Payload too large: requested {requested}, capacity {capacity}")]
    PayloadTooLarge { requested: usize, capacity: usize },

    /// Worker thread could not be spawned
    #[error("Spawn error: {message}")]
    Spawn {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl BusError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a config missing error
    pub fn config_missing(path: impl Into<String>) -> Self {
        Self::ConfigMissing { path: path.into() }
    }

    /// Create an invalid config error
    pub fn config_invalid(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a pool exhausted error
    pub fn pool_exhausted(pool: impl Into<String>) -> Self {
        Self::PoolExhausted { pool: pool.into() }
    }

    /// Create an allocation timeout error
    pub fn alloc_timeout(pool: impl Into<String>, timeout: Duration) -> Self {
        Self::AllocTimeout {
            pool: pool.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a delivery dropped error
    pub fn delivery_dropped(target: impl Into<String>) -> Self {
        Self::DeliveryDropped {
            target: target.into(),
        }
    }

    /// Create a double release error
    pub fn double_release(pool: impl Into<String>, slot: usize) -> Self {
        Self::DoubleRelease {
            pool: pool.into(),
            slot,
        }
    }

    /// Create an invalid slot error
    pub fn invalid_slot(slot: impl Into<String>) -> Self {
        Self::InvalidSlot { slot: slot.into() }
    }

    /// Create a setup failure error
    pub fn setup(message: impl Into<String>) -> Self {
        Self::SetupFailure {
            message: message.into(),
        }
    }

    /// Create an already registered error
    pub fn already_registered(target: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::AlreadyRegistered {
            target: target.into(),
            kind: kind.into(),
        }
    }

    /// Create a missing channel error
    pub fn missing_channel(module: impl Into<String>) -> Self {
        Self::MissingChannel {
            module: module.into(),
        }
    }

    /// Create a payload too large error
    pub fn payload_too_large(requested: usize, capacity: usize) -> Self {
        Self::PayloadTooLarge {
            requested,
            capacity,
        }
    }

    /// Create a spawn error from a thread builder failure
    pub fn spawn(source: std::io::Error, name: &str) -> Self {
        Self::Spawn {
            message: format!("{}: {}", name, source),
            source: Some(source),
        }
    }

    /// Whether the caller may simply drop the message and carry on
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::SetupFailure { .. } | Self::MissingChannel { .. } | Self::Spawn { .. }
        )
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BusError::pool_exhausted("streaming");
        assert!(matches!(err, BusError::PoolExhausted { .. }));

        let err = BusError::alloc_timeout("control", Duration::from_millis(500));
        assert!(matches!(err, BusError::AllocTimeout { timeout_ms: 500, .. }));

        let err = BusError::double_release("streaming", 3);
        assert!(matches!(err, BusError::DoubleRelease { slot: 3, .. }));

        let err = BusError::invalid_slot("control#9");
        assert!(err.to_string().contains("control#9"));
    }

    #[test]
    fn test_error_display() {
        let err = BusError::config_invalid("F", "not a number");
        let display = format!("{}", err);
        assert!(display.contains("Invalid config"));
        assert!(display.contains("not a number"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(BusError::pool_exhausted("streaming").is_recoverable());
        assert!(BusError::delivery_dropped("Log").is_recoverable());
        assert!(BusError::config_missing("/data/x.json").is_recoverable());
        assert!(!BusError::setup("gate").is_recoverable());
        assert!(!BusError::missing_channel("rgb").is_recoverable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: BusError = json_err.into();
        assert!(matches!(err, BusError::Serialization { .. }));
    }
}
