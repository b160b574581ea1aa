//! Pool sizing configuration
//!
//! Each pool's capacity is derived from a fraction `F` of the target count
//! times a concurrency credit `C`, clamped into `[min_entries, max_entries]`.
//! Values come from compiled-in defaults, optionally overridden by a JSON
//! document of the form:
//!
//! ```json
//! { "pools": { "streaming": { "F": 0.25, "C": 2, "payload_size": 128,
//!                             "min_entries": 8, "max_entries": 512 },
//!              "control":   { "F": 0.1 } } }
//! ```

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{BusError, Result},
    ids::{MAX_MESSAGE_SIZE, TARGET_COUNT},
};

pub const DEFAULT_FRACTION: f64 = 0.25;
pub const DEFAULT_CREDIT: u32 = 2;
pub const DEFAULT_PAYLOAD_SIZE: usize = 128;
pub const DEFAULT_MIN_ENTRIES: usize = 8;
pub const DEFAULT_MAX_ENTRIES: usize = 512;

/// Smallest payload width a pool may be configured with
pub const MIN_PAYLOAD_SIZE: usize = 16;

/// Default location of the sizing document on the device data partition
pub const DEFAULT_CONFIG_PATH: &str = "/data/dispatcher_pool_config.json";

/// Sizing parameters for one pool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolConfig {
    /// Fraction of targets expected to hold a message at once, in `[0, 1]`
    pub fraction: f64,
    /// Messages in flight per active target, at least 1
    pub credit: u32,
    /// Payload bytes per slot
    pub payload_size: usize,
    /// Lower bound on derived capacity
    pub min_entries: usize,
    /// Upper bound on derived capacity
    pub max_entries: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_FRACTION,
            credit: DEFAULT_CREDIT,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            min_entries: DEFAULT_MIN_ENTRIES,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl PoolConfig {
    /// Set the fraction `F`
    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.fraction = fraction;
        self
    }

    /// Set the concurrency credit `C`
    pub fn with_credit(mut self, credit: u32) -> Self {
        self.credit = credit;
        self
    }

    /// Set the payload width
    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size;
        self
    }

    /// Set both capacity bounds
    pub fn with_entries(mut self, min_entries: usize, max_entries: usize) -> Self {
        self.min_entries = min_entries;
        self.max_entries = max_entries;
        self
    }

    /// A config whose derived capacity is exactly `entries`
    pub fn fixed(entries: usize, payload_size: usize) -> Self {
        Self::default()
            .with_fraction(0.0)
            .with_payload_size(payload_size)
            .with_entries(entries, entries)
    }

    /// Clamp every field into its legal range
    pub fn sanitized(self) -> Self {
        let fraction = if self.fraction.is_nan() {
            DEFAULT_FRACTION
        } else {
            self.fraction.clamp(0.0, 1.0)
        };
        let min_entries = self.min_entries.max(1);
        Self {
            fraction,
            credit: self.credit.max(1),
            payload_size: self.payload_size.clamp(MIN_PAYLOAD_SIZE, MAX_MESSAGE_SIZE),
            min_entries,
            max_entries: self.max_entries.max(min_entries),
        }
    }

    /// Strictly check the configuration without altering it
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fraction) {
            return Err(BusError::config_invalid("F", "Fraction must be within [0, 1]"));
        }
        if self.credit == 0 {
            return Err(BusError::config_invalid("C", "Concurrency credit must be at least 1"));
        }
        if self.payload_size < MIN_PAYLOAD_SIZE {
            return Err(BusError::config_invalid(
                "payload_size",
                format!("Payload size must be at least {}", MIN_PAYLOAD_SIZE),
            ));
        }
        if self.payload_size > MAX_MESSAGE_SIZE {
            return Err(BusError::config_invalid(
                "payload_size",
                format!("Payload size cannot exceed {}", MAX_MESSAGE_SIZE),
            ));
        }
        if self.min_entries == 0 {
            return Err(BusError::config_invalid("min_entries", "Min entries cannot be zero"));
        }
        if self.max_entries < self.min_entries {
            return Err(BusError::config_invalid(
                "max_entries",
                "Max entries cannot be below min entries",
            ));
        }
        Ok(())
    }

    /// Derived capacity for `target_count` targets
    pub fn entries_for(&self, target_count: usize) -> usize {
        compute_entries(
            target_count,
            self.fraction,
            self.credit,
            self.min_entries,
            self.max_entries,
        )
    }

    /// Derived capacity for this system's target count
    pub fn entries(&self) -> usize {
        self.entries_for(TARGET_COUNT)
    }

    /// Bytes of payload storage the pool will reserve
    pub fn total_payload_bytes(&self) -> usize {
        self.entries() * self.payload_size.min(MAX_MESSAGE_SIZE)
    }

    fn apply(&mut self, section: &PoolSection) {
        let mut fraction = number(&section.fraction).unwrap_or(self.fraction);
        let mut credit = number(&section.credit).map_or(self.credit as i64, |v| v as i64);
        let mut payload = number(&section.payload_size).map_or(self.payload_size as i64, |v| v as i64);
        let mut min_e = number(&section.min_entries).map_or(self.min_entries as i64, |v| v as i64);
        let mut max_e = number(&section.max_entries).map_or(self.max_entries as i64, |v| v as i64);

        if fraction.is_nan() {
            fraction = self.fraction;
        }
        fraction = fraction.clamp(0.0, 1.0);
        if credit < 1 {
            credit = 1;
        }
        if payload < MIN_PAYLOAD_SIZE as i64 {
            payload = self.payload_size as i64;
        }
        if min_e < 1 {
            min_e = self.min_entries as i64;
        }
        if max_e < min_e {
            max_e = self.max_entries as i64;
        }

        self.fraction = fraction;
        self.credit = credit.min(u32::MAX as i64) as u32;
        self.payload_size = (payload as usize).min(MAX_MESSAGE_SIZE);
        self.min_entries = min_e as usize;
        self.max_entries = (max_e as usize).max(self.min_entries);
    }
}

/// `clamp(ceil(target_count * F * C), min, max)`, never below 1
pub fn compute_entries(
    target_count: usize,
    fraction: f64,
    credit: u32,
    min_entries: usize,
    max_entries: usize,
) -> usize {
    let raw = (target_count as f64 * fraction * credit as f64).ceil();
    let entries = if raw.is_finite() && raw >= 1.0 {
        raw.min(usize::MAX as f64) as usize
    } else {
        1
    };
    let min_e = min_entries.max(1);
    let max_e = max_entries.max(min_e);
    entries.clamp(min_e, max_e)
}

/// Which of the two pools a message is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolId {
    /// High-rate sensor traffic
    Streaming,
    /// Low-rate commands and status
    Control,
}

impl PoolId {
    pub const ALL: [PoolId; 2] = [PoolId::Streaming, PoolId::Control];

    pub const fn name(self) -> &'static str {
        match self {
            PoolId::Streaming => "streaming",
            PoolId::Control => "control",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            PoolId::Streaming => 0,
            PoolId::Control => 1,
        }
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sizing for both pools
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AllocatorConfig {
    pub streaming: PoolConfig,
    pub control: PoolConfig,
}

impl AllocatorConfig {
    /// Compiled-in defaults for both pools
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for one pool
    pub fn pool(&self, id: PoolId) -> &PoolConfig {
        match id {
            PoolId::Streaming => &self.streaming,
            PoolId::Control => &self.control,
        }
    }

    /// Override the config of one pool
    pub fn with_pool(mut self, id: PoolId, config: PoolConfig) -> Self {
        match id {
            PoolId::Streaming => self.streaming = config,
            PoolId::Control => self.control = config,
        }
        self
    }

    /// Overlay values from a JSON document on top of the current values
    ///
    /// Both sections are validated on a copy and swapped in together. On any
    /// error the current values are left untouched.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BusError::config_missing(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| BusError::from_io(e, &format!("Failed to read {}", path.display())))?;
        self.load_str(&text)
    }

    /// Overlay values from JSON text
    pub fn load_str(&mut self, text: &str) -> Result<()> {
        let doc: ConfigDocument = serde_json::from_str(text)?;

        let mut next = *self;
        if let Some(section) = &doc.pools.streaming {
            next.streaming.apply(section);
        }
        if let Some(section) = &doc.pools.control {
            next.control.apply(section);
        }
        *self = next;

        log::info!(
            "Loaded pool config: streaming F={:.3} C={} payload={} min={} max={}",
            self.streaming.fraction,
            self.streaming.credit,
            self.streaming.payload_size,
            self.streaming.min_entries,
            self.streaming.max_entries
        );
        log::info!(
            "Loaded pool config: control F={:.3} C={} payload={} min={} max={}",
            self.control.fraction,
            self.control.credit,
            self.control.payload_size,
            self.control.min_entries,
            self.control.max_entries
        );
        Ok(())
    }

    /// Defaults overlaid with `path` when it can be read; never fails
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let mut config = Self::default();
        match config.load(path.as_ref()) {
            Ok(()) => log::info!("pool configuration loaded from {}", path.as_ref().display()),
            Err(BusError::ConfigMissing { path }) => {
                log::warn!("Config file not found: {} (using defaults)", path)
            }
            Err(e) => log::warn!("Pool config rejected, using defaults: {}", e),
        }
        config
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    pools: PoolsSection,
}

#[derive(Debug, Default, Deserialize)]
struct PoolsSection {
    #[serde(default)]
    streaming: Option<PoolSection>,
    #[serde(default)]
    control: Option<PoolSection>,
}

// Fields are kept as raw JSON so a wrongly-typed value counts as absent
#[derive(Debug, Default, Deserialize)]
struct PoolSection {
    #[serde(rename = "F", default)]
    fraction: Option<Value>,
    #[serde(rename = "C", default)]
    credit: Option<Value>,
    #[serde(default)]
    payload_size: Option<Value>,
    #[serde(default)]
    min_entries: Option<Value>,
    #[serde(default)]
    max_entries: Option<Value>,
}

fn number(value: &Option<Value>) -> Option<f64> {
    value.as_ref().and_then(Value::as_f64)
}
