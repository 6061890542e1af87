//! Configuration management for the entropy driver

use crate::pool::MAX_CAPACITY;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the busy-wait path does with the generator once it has its bytes
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusyWaitExit {
    /// Keep generating; the interrupt handler stops it once pools are full
    #[default]
    LeaveRunning,
    /// Stop immediately unless a pool is below its threshold
    Stop,
}

/// Driver configuration
///
/// Pool lengths count usable bytes; each pool reserves one extra slot.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DriverConfig {
    /// Bytes buffered for interrupt-context callers
    #[serde(default = "default_isr_pool_len")]
    pub isr_pool_len: usize,

    /// Restart generation when the ISR pool drops below this
    #[serde(default = "default_isr_threshold")]
    pub isr_threshold: usize,

    /// Bytes buffered for thread-context callers
    #[serde(default = "default_thr_pool_len")]
    pub thr_pool_len: usize,

    /// Restart generation when the thread pool drops below this
    #[serde(default = "default_thr_threshold")]
    pub thr_threshold: usize,

    /// Enable hardware bias correction
    #[serde(default = "default_true")]
    pub bias_correction: bool,

    /// Priority of the "value ready" interrupt
    #[serde(default = "default_irq_priority")]
    pub irq_priority: u8,

    /// Generator handling after a busy-wait request
    #[serde(default)]
    pub busy_wait_exit: BusyWaitExit,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            isr_pool_len: default_isr_pool_len(),
            isr_threshold: default_isr_threshold(),
            thr_pool_len: default_thr_pool_len(),
            thr_threshold: default_thr_threshold(),
            bias_correction: default_true(),
            irq_priority: default_irq_priority(),
            busy_wait_exit: BusyWaitExit::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from `HWRNG_*` environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("HWRNG_").from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&yaml)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_pool("isr", self.isr_pool_len, self.isr_threshold)?;
        validate_pool("thr", self.thr_pool_len, self.thr_threshold)?;
        Ok(())
    }
}

fn validate_pool(name: &str, len: usize, threshold: usize) -> Result<()> {
    if len == 0 || len >= MAX_CAPACITY {
        return Err(Error::Config(format!(
            "{}_pool_len must be between 1 and {}",
            name,
            MAX_CAPACITY - 1
        )));
    }

    // a zero threshold would never restart a drained generator
    if threshold == 0 || threshold > len {
        return Err(Error::Config(format!(
            "{}_threshold must be between 1 and {}_pool_len ({})",
            name, name, len
        )));
    }

    Ok(())
}

// Default value functions
fn default_isr_pool_len() -> usize {
    16
}

fn default_isr_threshold() -> usize {
    12
}

fn default_thr_pool_len() -> usize {
    8
}

fn default_thr_threshold() -> usize {
    4
}

fn default_irq_priority() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DriverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.busy_wait_exit, BusyWaitExit::LeaveRunning);
    }

    #[test]
    fn test_threshold_bounds() {
        let config = DriverConfig {
            thr_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DriverConfig {
            isr_pool_len: 4,
            isr_threshold: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DriverConfig {
            isr_pool_len: 254,
            isr_threshold: 254,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_len_bounds() {
        let config = DriverConfig {
            thr_pool_len: 255,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_yaml_config() {
        let config = DriverConfig::from_yaml_str(
            "isr_pool_len: 32\nisr_threshold: 8\nbias_correction: false\nbusy_wait_exit: stop\n",
        )
        .unwrap();

        assert_eq!(config.isr_pool_len, 32);
        assert_eq!(config.isr_threshold, 8);
        assert_eq!(config.thr_pool_len, 8);
        assert!(!config.bias_correction);
        assert_eq!(config.busy_wait_exit, BusyWaitExit::Stop);
    }

    #[test]
    fn test_yaml_rejects_invalid() {
        assert!(DriverConfig::from_yaml_str("thr_pool_len: 2\nthr_threshold: 3\n").is_err());
        assert!(DriverConfig::from_yaml_str("isr_pool_len: [1]\n").is_err());
    }

    #[test]
    fn test_env_config() {
        std::env::set_var("HWRNG_THR_POOL_LEN", "64");
        std::env::set_var("HWRNG_THR_THRESHOLD", "16");
        let config = DriverConfig::from_env().unwrap();
        std::env::remove_var("HWRNG_THR_POOL_LEN");
        std::env::remove_var("HWRNG_THR_THRESHOLD");

        assert_eq!(config.thr_pool_len, 64);
        assert_eq!(config.thr_threshold, 16);
        assert_eq!(config.isr_pool_len, 16);
    }
}
