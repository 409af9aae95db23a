// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sliding-window frequency stability statistics.
//!
//! Samples are converted to fractional frequency `(f - nominal) / nominal`
//! before the Allan variance and kurtosis are computed, so the figures do not
//! depend on whether the grid runs at 50 or 60 Hz. The standard deviation is
//! taken on the raw Hz values.

use std::collections::VecDeque;
use std::time::Instant;

use crate::config::AnalysisConfig;

/// Below this fractional variance the window is treated as flat and the
/// kurtosis reported as 0.0.
const FLAT_VARIANCE: f64 = 1e-12;

/// One per-tick frequency measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencySample {
    pub value_hz: f64,
    pub tick: Instant,
}

/// Stability figures for the current window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityMetrics {
    /// Allan variance of fractional frequency at the averaging time nearest the target
    pub allan_variance: f64,
    /// Population standard deviation in Hz
    pub std_dev: f64,
    /// Excess kurtosis of fractional frequency
    pub kurtosis: f64,
    /// Window size the figures were computed from
    pub samples: usize,
}

/// Fixed-capacity ring of frequency samples.
#[derive(Debug, Clone)]
pub struct StabilityAnalyzer {
    samples: VecDeque<FrequencySample>,
    capacity: usize,
    nominal_frequency: f64,
    tau0_secs: f64,
    target_tau_secs: f64,
    min_window: usize,
}

impl StabilityAnalyzer {
    pub fn new(
        capacity: usize,
        nominal_frequency: f64,
        sample_rate_hz: f64,
        target_tau_secs: f64,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            nominal_frequency,
            tau0_secs: 1.0 / sample_rate_hz,
            target_tau_secs,
            min_window: 10,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        let mut analyzer = Self::new(
            config.window_capacity(),
            config.nominal_frequency,
            config.sample_rate_hz,
            config.allan_tau_secs,
        );
        analyzer.min_window = config.min_window;
        analyzer
    }

    /// Append a measurement, evicting the oldest when full.
    pub fn push(&mut self, value_hz: f64, tick: Instant) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(FrequencySample { value_hz, tick });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> impl Iterator<Item = &FrequencySample> {
        self.samples.iter()
    }

    /// Most recent measurement
    pub fn latest(&self) -> Option<&FrequencySample> {
        self.samples.back()
    }

    /// Compute all three metrics.
    ///
    /// Returns `None` below the minimum window size or when any sample in the
    /// window is not finite.
    pub fn analyze(&self) -> Option<StabilityMetrics> {
        if self.samples.len() < self.min_window {
            return None;
        }
        if self.samples.iter().any(|s| !s.value_hz.is_finite()) {
            return None;
        }

        let values: Vec<f64> = self.samples.iter().map(|s| s.value_hz).collect();
        let fractional: Vec<f64> = values
            .iter()
            .map(|f| (f - self.nominal_frequency) / self.nominal_frequency)
            .collect();

        let metrics = StabilityMetrics {
            allan_variance: allan_variance_at(&fractional, self.tau0_secs, self.target_tau_secs)?,
            std_dev: std_dev(&values)?,
            kurtosis: kurtosis(&fractional)?,
            samples: values.len(),
        };

        if metrics.allan_variance.is_finite()
            && metrics.std_dev.is_finite()
            && metrics.kurtosis.is_finite()
        {
            Some(metrics)
        } else {
            None
        }
    }
}

/// Overlapping Allan deviation of fractional frequency `y` sampled every `tau0`.
///
/// Averaging factors are octaves (m = 1, 2, 4, ...) for as long as at least one
/// second difference fits. Returns `(tau, deviation)` pairs.
pub fn allan_deviation_curve(y: &[f64], tau0: f64) -> Vec<(f64, f64)> {
    if y.len() < 2 || !(tau0.is_finite() && tau0 > 0.0) {
        return Vec::new();
    }

    // Integrate to phase
    let mut x = Vec::with_capacity(y.len() + 1);
    x.push(0.0);
    for (k, value) in y.iter().enumerate() {
        x.push(x[k] + value * tau0);
    }

    let n = x.len();
    let mut curve = Vec::new();
    let mut m = 1;
    while n > 2 * m {
        let terms = n - 2 * m;
        let sum: f64 = (0..terms)
            .map(|i| {
                let d = x[i + 2 * m] - 2.0 * x[i + m] + x[i];
                d * d
            })
            .sum();
        let tau = m as f64 * tau0;
        let avar = sum / (2.0 * tau * tau * terms as f64);
        curve.push((tau, avar.sqrt()));
        m *= 2;
    }
    curve
}

/// Allan variance at the curve point whose tau is nearest `target_tau`.
pub fn allan_variance_at(y: &[f64], tau0: f64, target_tau: f64) -> Option<f64> {
    allan_deviation_curve(y, tau0)
        .into_iter()
        .min_by(|a, b| (a.0 - target_tau).abs().total_cmp(&(b.0 - target_tau).abs()))
        .map(|(_, adev)| adev * adev)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

/// Excess (Fisher) kurtosis with population moments.
pub fn kurtosis(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let (m2, m4) = values.iter().fold((0.0, 0.0), |(m2, m4), v| {
        let d2 = (v - mean).powi(2);
        (m2 + d2, m4 + d2 * d2)
    });
    let m2 = m2 / n;
    let m4 = m4 / n;

    if m2 < FLAT_VARIANCE {
        return Some(0.0);
    }
    Some(m4 / (m2 * m2) - 3.0)
}
