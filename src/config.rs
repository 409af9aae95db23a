// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for GridSense
//!
//! Values are produced by an external loader (any serde format); this module
//! only defines the shapes, the defaults and the validation rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GridSenseError, Result};
use crate::frequency::EstimationMethod;
use crate::source::Bias;

/// Per-channel acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Minimum spacing between accepted edges (default: 0.2 ms)
    pub debounce_ns: i64,

    /// Line bias requested from the GPIO controller
    pub bias: Bias,

    /// Maximum number of timestamps kept per channel
    pub timestamp_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            debounce_ns: 200_000,
            bias: Bias::PullUp,
            timestamp_capacity: 4096,
        }
    }
}

impl ChannelConfig {
    /// Create a configuration with a specific debounce threshold
    pub fn with_debounce_ns(debounce_ns: i64) -> Self {
        Self {
            debounce_ns,
            ..Default::default()
        }
    }

    /// Create a configuration with a specific log capacity
    pub fn with_capacity(timestamp_capacity: usize) -> Self {
        Self {
            timestamp_capacity,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce_ns <= 0 {
            return Err(GridSenseError::InvalidConfig(format!(
                "debounce_ns must be positive, got {}",
                self.debounce_ns
            )));
        }
        if self.timestamp_capacity == 0 {
            return Err(GridSenseError::InvalidConfig(
                "timestamp_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Edge-event source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// GPIO character device
    pub chip_path: String,

    /// Consumer label shown by the kernel for requested lines
    pub consumer: String,

    /// Drain loop wait timeout; bounds shutdown latency
    pub wait_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            chip_path: "/dev/gpiochip0".to_string(),
            consumer: "gridsense".to_string(),
            wait_timeout_ms: 500,
        }
    }
}

impl SourceConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.wait_timeout_ms == 0 {
            return Err(GridSenseError::InvalidConfig(
                "wait_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Frequency extraction and stability analysis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sensor edges per AC cycle (2 for a full-wave optocoupler)
    pub pulses_per_cycle: u32,

    /// Nominal mains frequency in Hz
    pub nominal_frequency: f64,

    /// Lower bound of the sane AC band in Hz
    pub min_freq: f64,

    /// Upper bound of the sane AC band in Hz
    pub max_freq: f64,

    /// Analysis ticks per second
    pub sample_rate_hz: f64,

    /// Length of the frequency window in seconds
    pub buffer_duration_secs: f64,

    /// Target averaging time for the Allan variance
    pub allan_tau_secs: f64,

    /// Minimum window size before metrics are computed
    pub min_window: usize,

    /// Timestamp-to-frequency algorithm
    pub method: EstimationMethod,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            pulses_per_cycle: 2,
            nominal_frequency: 60.0,
            min_freq: 40.0,
            max_freq: 80.0,
            sample_rate_hz: 2.0,
            buffer_duration_secs: 30.0,
            allan_tau_secs: 1.0,
            min_window: 10,
            method: EstimationMethod::Regression,
        }
    }
}

impl AnalysisConfig {
    /// Preset for 50 Hz grids
    pub fn fifty_hz() -> Self {
        Self {
            nominal_frequency: 50.0,
            ..Default::default()
        }
    }

    /// Ring buffer capacity: buffer duration times sample rate
    pub fn window_capacity(&self) -> usize {
        (self.buffer_duration_secs * self.sample_rate_hz).ceil().max(1.0) as usize
    }

    /// Analysis tick period
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate_hz)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pulses_per_cycle == 0 {
            return Err(GridSenseError::InvalidConfig(
                "pulses_per_cycle must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("nominal_frequency", self.nominal_frequency),
            ("sample_rate_hz", self.sample_rate_hz),
            ("buffer_duration_secs", self.buffer_duration_secs),
            ("allan_tau_secs", self.allan_tau_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(GridSenseError::InvalidConfig(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if !(self.min_freq.is_finite() && self.max_freq.is_finite())
            || self.min_freq >= self.max_freq
        {
            return Err(GridSenseError::InvalidConfig(format!(
                "invalid frequency band: min_freq ({}) must be less than max_freq ({})",
                self.min_freq, self.max_freq
            )));
        }
        if self.min_window < 2 {
            return Err(GridSenseError::InvalidConfig(
                "min_window must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-metric limits above which a source is considered a generator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Allan variance of fractional frequency at the target tau
    pub allan_variance: f64,

    /// Standard deviation of frequency in Hz
    pub std_dev: f64,

    /// Excess kurtosis of fractional frequency
    pub kurtosis: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            allan_variance: 1e-9,
            std_dev: 0.05,
            kurtosis: 3.0,
        }
    }
}

impl ClassifierThresholds {
    pub fn new(allan_variance: f64, std_dev: f64, kurtosis: f64) -> Self {
        Self {
            allan_variance,
            std_dev,
            kurtosis,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("allan_variance", self.allan_variance),
            ("std_dev", self.std_dev),
            ("kurtosis", self.kurtosis),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(GridSenseError::InvalidConfig(format!(
                    "threshold {} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Power state machine timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// Signal loss lasting this long means the site is off grid
    pub off_grid_threshold_ms: u64,

    /// Longest continuous ambiguity before falling back to off grid
    pub transitioning_timeout_ms: u64,

    /// How long a new target must persist before it is entered (0 = immediately)
    pub confirmation_ms: u64,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            off_grid_threshold_ms: 5_000,
            transitioning_timeout_ms: 30_000,
            confirmation_ms: 0,
        }
    }
}

impl StateMachineConfig {
    pub fn off_grid_threshold(&self) -> Duration {
        Duration::from_millis(self.off_grid_threshold_ms)
    }

    pub fn transitioning_timeout(&self) -> Duration {
        Duration::from_millis(self.transitioning_timeout_ms)
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.off_grid_threshold_ms == 0 {
            return Err(GridSenseError::InvalidConfig(
                "off_grid_threshold_ms must be positive".to_string(),
            ));
        }
        if self.transitioning_timeout_ms == 0 {
            return Err(GridSenseError::InvalidConfig(
                "transitioning_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the monitoring pipeline consumes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// GPIO line offset of the zero-crossing sensor
    pub channel_id: u32,
    pub channel: ChannelConfig,
    pub source: SourceConfig,
    pub analysis: AnalysisConfig,
    pub thresholds: ClassifierThresholds,
    pub state_machine: StateMachineConfig,
}

impl MonitorConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.channel.validate()?;
        self.source.validate()?;
        self.analysis.validate()?;
        self.thresholds.validate()?;
        self.state_machine.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.debounce_ns, 200_000);
        assert_eq!(config.bias, Bias::PullUp);
        assert_eq!(config.timestamp_capacity, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_config_rejects_zero_debounce() {
        let config = ChannelConfig::with_debounce_ns(0);
        assert!(matches!(
            config.validate(),
            Err(GridSenseError::InvalidConfig(_))
        ));
        assert!(ChannelConfig::with_capacity(0).validate().is_err());
    }

    #[test]
    fn test_window_capacity() {
        let config = AnalysisConfig::default();
        assert_eq!(config.window_capacity(), 60);
        assert_eq!(config.tick_period(), Duration::from_millis(500));

        let odd = AnalysisConfig {
            sample_rate_hz: 3.0,
            buffer_duration_secs: 2.5,
            ..Default::default()
        };
        assert_eq!(odd.window_capacity(), 8);
    }

    #[test]
    fn test_analysis_config_rejects_inverted_band() {
        let config = AnalysisConfig {
            min_freq: 70.0,
            max_freq: 50.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisConfig {
            sample_rate_hz: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_thresholds_must_be_positive() {
        assert!(ClassifierThresholds::default().validate().is_ok());
        assert!(ClassifierThresholds::new(1e-9, -0.1, 3.0)
            .validate()
            .is_err());
        assert!(ClassifierThresholds::new(f64::NAN, 0.05, 3.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_state_machine_config_durations() {
        let config = StateMachineConfig::default();
        assert_eq!(config.off_grid_threshold(), Duration::from_secs(5));
        assert_eq!(config.transitioning_timeout(), Duration::from_secs(30));
        assert_eq!(config.confirmation(), Duration::ZERO);
    }

    #[test]
    fn test_fifty_hz_preset() {
        let config = AnalysisConfig::fifty_hz();
        assert_eq!(config.nominal_frequency, 50.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_monitor_config_partial_json() {
        let json = r#"{
            "channel_id": 26,
            "channel": { "debounce_ns": 100000 },
            "thresholds": { "std_dev": 0.1 },
            "state_machine": { "off_grid_threshold_ms": 3000 }
        }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.channel_id, 26);
        assert_eq!(config.channel.debounce_ns, 100_000);
        assert_eq!(config.channel.timestamp_capacity, 4096);
        assert_eq!(config.thresholds.std_dev, 0.1);
        assert_eq!(config.thresholds.allan_variance, 1e-9);
        assert_eq!(config.state_machine.off_grid_threshold_ms, 3000);
        assert_eq!(config.analysis.method, EstimationMethod::Regression);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_monitor_config_validation_reports_section() {
        let mut config = MonitorConfig::default();
        config.state_machine.transitioning_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(format!("{}", err).contains("transitioning_timeout_ms"));
    }
}
