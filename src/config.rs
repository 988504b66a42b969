use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::snapshot::{TemperatureField, ALL_TEMPERATURE_FIELDS};

/// Attempts per poll or command before giving up, and the number of consecutive
/// failed cycles after which a device is reported unavailable.
pub const RETRY_THRESHOLD: u32 = 3;
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Settings of one thermostat, fixed for the lifetime of its coordinator.
///
/// ```
/// let config = cometread::CoordinatorConfig::from_json(
///     r#"{ "address": "E0:E5:CF:00:00:01", "retry_count": 4 }"#,
/// ).unwrap();
/// assert_eq!(config.retry_count, 4);
/// assert_eq!(config.update_interval().as_secs(), 300);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// BLE address of the thermostat
    pub address: String,
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Deadline for each individual session call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature_fields")]
    pub temperature_fields: Vec<TemperatureField>,
}

fn default_update_interval_secs() -> u64 {
    DEFAULT_UPDATE_INTERVAL.as_secs()
}

fn default_retry_count() -> u32 {
    RETRY_THRESHOLD
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_temperature_fields() -> Vec<TemperatureField> {
    ALL_TEMPERATURE_FIELDS.to_vec()
}

impl CoordinatorConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            update_interval_secs: default_update_interval_secs(),
            retry_count: default_retry_count(),
            timeout_secs: default_timeout_secs(),
            temperature_fields: default_temperature_fields(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if !(1..=5).contains(&self.retry_count) {
            return Err(ConfigError::RetryCount(self.retry_count));
        }
        if !(10..=60).contains(&self.timeout_secs) {
            return Err(ConfigError::Timeout(self.timeout_secs));
        }
        if self.update_interval_secs == 0 {
            return Err(ConfigError::UpdateInterval);
        }
        if self.temperature_fields.is_empty() {
            return Err(ConfigError::NoTemperatureFields);
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
