// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Frequency extraction from pulse timestamps
//!
//! Two estimators are available:
//!
//! - **Two-point**: `(n - 1) / ((t_last - t_first) * pulses_per_cycle)`. Only
//!   the endpoint timestamps matter, so their jitter goes straight into the
//!   result.
//! - **Regression**: least-squares fit of timestamp against pulse index; the
//!   slope is seconds per pulse. Every timestamp contributes, which makes it
//!   the better choice whenever edges carry timing jitter.
//!
//! Neither estimator fails. Too few pulses, an empty span or a result outside
//! the sane AC band all yield `None`.

use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;

const NANOS_PER_SEC: f64 = 1e9;

/// Timestamp-to-frequency algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EstimationMethod {
    TwoPoint,
    #[default]
    Regression,
}

/// Converts a timestamp log into a mains frequency
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyEstimator {
    method: EstimationMethod,
    pulses_per_cycle: u32,
    nominal_frequency: f64,
    min_freq: f64,
    max_freq: f64,
}

impl FrequencyEstimator {
    pub fn new(method: EstimationMethod, pulses_per_cycle: u32) -> Self {
        let defaults = AnalysisConfig::default();
        Self {
            method,
            pulses_per_cycle: pulses_per_cycle.max(1),
            nominal_frequency: defaults.nominal_frequency,
            min_freq: defaults.min_freq,
            max_freq: defaults.max_freq,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            method: config.method,
            pulses_per_cycle: config.pulses_per_cycle.max(1),
            nominal_frequency: config.nominal_frequency,
            min_freq: config.min_freq,
            max_freq: config.max_freq,
        }
    }

    /// Restrict results to `[min_freq, max_freq]`
    pub fn with_band(mut self, min_freq: f64, max_freq: f64) -> Self {
        self.min_freq = min_freq;
        self.max_freq = max_freq;
        self
    }

    pub fn method(&self) -> EstimationMethod {
        self.method
    }

    /// Estimate with the configured method
    pub fn estimate(&self, timestamps: &[i64]) -> Option<f64> {
        match self.method {
            EstimationMethod::TwoPoint => self.two_point(timestamps),
            EstimationMethod::Regression => self.regression(timestamps),
        }
    }

    pub fn two_point(&self, timestamps: &[i64]) -> Option<f64> {
        if timestamps.len() < 2 {
            return None;
        }
        let span_ns = timestamps[timestamps.len() - 1] - timestamps[0];
        if span_ns <= 0 {
            return None;
        }
        let span_secs = span_ns as f64 / NANOS_PER_SEC;
        let freq = (timestamps.len() - 1) as f64 / (span_secs * self.pulses_per_cycle as f64);
        self.in_band(freq)
    }

    pub fn regression(&self, timestamps: &[i64]) -> Option<f64> {
        let n = timestamps.len();
        if n < 2 {
            return None;
        }
        let first = timestamps[0];
        if timestamps[n - 1] - first <= 0 {
            return None;
        }

        // Offsets from the first pulse keep the sums well inside f64 precision
        let mean_index = (n - 1) as f64 / 2.0;
        let mean_time = timestamps
            .iter()
            .map(|&t| (t - first) as f64 / NANOS_PER_SEC)
            .sum::<f64>()
            / n as f64;

        let mut covariance = 0.0;
        let mut index_variance = 0.0;
        for (i, &t) in timestamps.iter().enumerate() {
            let di = i as f64 - mean_index;
            let dt = (t - first) as f64 / NANOS_PER_SEC - mean_time;
            covariance += di * dt;
            index_variance += di * di;
        }

        let seconds_per_pulse = covariance / index_variance;
        if !(seconds_per_pulse.is_finite() && seconds_per_pulse > 0.0) {
            return None;
        }
        self.in_band(1.0 / (seconds_per_pulse * self.pulses_per_cycle as f64))
    }

    fn in_band(&self, freq: f64) -> Option<f64> {
        if !freq.is_finite() {
            return None;
        }
        if freq < self.min_freq || freq > self.max_freq {
            warn!(
                "Frequency {:.3} Hz outside {}-{} Hz, discarded",
                freq, self.min_freq, self.max_freq
            );
            return None;
        }
        Some(freq)
    }

    /// Whether `count` pulses in `duration` are plausible for a live mains signal.
    ///
    /// Accepts anything between 5/6 and 7/6 of the nominal frequency, which is
    /// 50-70 Hz on a 60 Hz grid.
    pub fn validate_pulse_count(&self, count: usize, duration: Duration) -> bool {
        let secs = duration.as_secs_f64();
        if secs <= 0.0 {
            return false;
        }
        let per_sec = self.nominal_frequency * self.pulses_per_cycle as f64;
        let min = per_sec * 5.0 / 6.0 * secs;
        let max = per_sec * 7.0 / 6.0 * secs;
        let count = count as f64;
        count >= min && count <= max
    }
}

impl Default for FrequencyEstimator {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}
