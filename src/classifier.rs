// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Source classification module
//!
//! Maps the three stability metrics to a raw verdict on what feeds the site.
//! Any single metric above its threshold is enough to call a generator:
//! governor hunting shows up in the standard deviation and Allan variance,
//! AVR instability in the kurtosis.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierThresholds;
use crate::stability::StabilityMetrics;

/// Raw per-tick verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Classification {
    /// Utility grid: every metric within its threshold
    Grid,
    /// Backup generator: at least one metric above its threshold
    Generator,
    /// Not enough information
    #[default]
    Unknown,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Grid => "GRID",
            Self::Generator => "GENERATOR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Metric that can push a source over the generator line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    AllanVariance,
    StdDev,
    Kurtosis,
}

/// Classify from individual metrics.
///
/// A missing or non-finite metric yields `Unknown`.
pub fn classify(
    allan_variance: Option<f64>,
    std_dev: Option<f64>,
    kurtosis: Option<f64>,
    thresholds: &ClassifierThresholds,
) -> Classification {
    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
    let (allan_variance, std_dev, kurtosis) =
        match (finite(allan_variance), finite(std_dev), finite(kurtosis)) {
            (Some(a), Some(s), Some(k)) => (a, s, k),
            _ => return Classification::Unknown,
        };

    if allan_variance > thresholds.allan_variance
        || std_dev > thresholds.std_dev
        || kurtosis > thresholds.kurtosis
    {
        Classification::Generator
    } else {
        Classification::Grid
    }
}

/// Threshold classifier over [`StabilityMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceClassifier {
    thresholds: ClassifierThresholds,
}

impl SourceClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    pub fn classify(&self, metrics: &StabilityMetrics) -> Classification {
        classify(
            Some(metrics.allan_variance),
            Some(metrics.std_dev),
            Some(metrics.kurtosis),
            &self.thresholds,
        )
    }

    /// `Unknown` when the analyzer had no result
    pub fn classify_metrics(&self, metrics: Option<&StabilityMetrics>) -> Classification {
        metrics.map_or(Classification::Unknown, |m| self.classify(m))
    }

    /// Which metrics are above their thresholds
    pub fn exceeded_metrics(&self, metrics: &StabilityMetrics) -> Vec<Metric> {
        let mut exceeded = Vec::new();
        if metrics.allan_variance > self.thresholds.allan_variance {
            exceeded.push(Metric::AllanVariance);
        }
        if metrics.std_dev > self.thresholds.std_dev {
            exceeded.push(Metric::StdDev);
        }
        if metrics.kurtosis > self.thresholds.kurtosis {
            exceeded.push(Metric::Kurtosis);
        }
        exceeded
    }
}
