// GridSense Sim - Pulse patterns
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pulse-train generators for an optically sensed AC line.
//!
//! Every generator returns rising-edge timestamps in nanoseconds, the same
//! shape the kernel hands out for GPIO edge events. Timestamps are computed
//! from the ideal pulse time and rounded once, so long trains do not
//! accumulate rounding drift.

use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

const NANOS_PER_SEC: f64 = 1e9;

/// Invalid generator parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatternError {
    #[error("Frequency must be positive and finite, got {0}")]
    InvalidFrequency(f64),

    #[error("Duration must be non-negative and finite, got {0}")]
    InvalidDuration(f64),

    #[error("Pulses per cycle must be at least 1")]
    InvalidPulsesPerCycle,

    #[error("Invalid jitter standard deviation: {0}")]
    InvalidJitter(f64),
}

pub type Result<T> = std::result::Result<T, PatternError>;

/// Shape of the AC signal seen by the sensor for some stretch of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PulsePattern {
    /// Perfectly periodic mains.
    Stable { frequency_hz: f64 },

    /// Periodic mains with Gaussian timing jitter on each edge.
    Jittered { frequency_hz: f64, jitter_std_ns: f64 },

    /// Governor hunting: frequency modulated sinusoidally around a base.
    ///
    /// `f(t) = base_hz + amplitude_hz * sin(2*PI*modulation_hz*t)`
    Hunting {
        base_hz: f64,
        amplitude_hz: f64,
        modulation_hz: f64,
    },

    /// No AC present, no pulses.
    Silent,
}

impl PulsePattern {
    /// Generate the train for `duration_secs` starting at `start_ns`.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        duration_secs: f64,
        pulses_per_cycle: u32,
        start_ns: i64,
        rng: &mut R,
    ) -> Result<Vec<i64>> {
        match *self {
            Self::Stable { frequency_hz } => {
                stable(frequency_hz, duration_secs, pulses_per_cycle, start_ns)
            }
            Self::Jittered {
                frequency_hz,
                jitter_std_ns,
            } => jittered(
                frequency_hz,
                duration_secs,
                pulses_per_cycle,
                start_ns,
                jitter_std_ns,
                rng,
            ),
            Self::Hunting {
                base_hz,
                amplitude_hz,
                modulation_hz,
            } => hunting(
                base_hz,
                amplitude_hz,
                modulation_hz,
                duration_secs,
                pulses_per_cycle,
                start_ns,
            ),
            Self::Silent => {
                check_duration(duration_secs)?;
                Ok(Vec::new())
            }
        }
    }
}

fn check_frequency(frequency_hz: f64) -> Result<()> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return Err(PatternError::InvalidFrequency(frequency_hz));
    }
    Ok(())
}

fn check_duration(duration_secs: f64) -> Result<()> {
    if !(duration_secs.is_finite() && duration_secs >= 0.0) {
        return Err(PatternError::InvalidDuration(duration_secs));
    }
    Ok(())
}

fn check_pulses_per_cycle(pulses_per_cycle: u32) -> Result<()> {
    if pulses_per_cycle == 0 {
        return Err(PatternError::InvalidPulsesPerCycle);
    }
    Ok(())
}

/// Number of whole pulses a constant-frequency train emits in `duration_secs`.
pub fn pulse_count(frequency_hz: f64, duration_secs: f64, pulses_per_cycle: u32) -> usize {
    (duration_secs * frequency_hz * pulses_per_cycle as f64).floor() as usize
}

/// Perfectly periodic train: `floor(duration * f * ppc)` pulses.
pub fn stable(
    frequency_hz: f64,
    duration_secs: f64,
    pulses_per_cycle: u32,
    start_ns: i64,
) -> Result<Vec<i64>> {
    check_frequency(frequency_hz)?;
    check_duration(duration_secs)?;
    check_pulses_per_cycle(pulses_per_cycle)?;

    let period_ns = NANOS_PER_SEC / (frequency_hz * pulses_per_cycle as f64);
    let count = pulse_count(frequency_hz, duration_secs, pulses_per_cycle);

    Ok((0..count)
        .map(|k| start_ns + (k as f64 * period_ns).round() as i64)
        .collect())
}

/// Periodic train with independent Gaussian jitter on every edge.
///
/// Jitter is clamped to a quarter period so edges never reorder.
pub fn jittered<R: Rng + ?Sized>(
    frequency_hz: f64,
    duration_secs: f64,
    pulses_per_cycle: u32,
    start_ns: i64,
    jitter_std_ns: f64,
    rng: &mut R,
) -> Result<Vec<i64>> {
    if !(jitter_std_ns.is_finite() && jitter_std_ns >= 0.0) {
        return Err(PatternError::InvalidJitter(jitter_std_ns));
    }
    let ideal = stable(frequency_hz, duration_secs, pulses_per_cycle, start_ns)?;
    if jitter_std_ns == 0.0 {
        return Ok(ideal);
    }

    let normal =
        Normal::new(0.0, jitter_std_ns).map_err(|_| PatternError::InvalidJitter(jitter_std_ns))?;
    let limit = NANOS_PER_SEC / (frequency_hz * pulses_per_cycle as f64) / 4.0;

    Ok(ideal
        .into_iter()
        .map(|t| {
            let offset = normal.sample(rng).clamp(-limit, limit);
            t + offset.round() as i64
        })
        .collect())
}

/// Frequency-modulated train, integrated pulse by pulse.
pub fn hunting(
    base_hz: f64,
    amplitude_hz: f64,
    modulation_hz: f64,
    duration_secs: f64,
    pulses_per_cycle: u32,
    start_ns: i64,
) -> Result<Vec<i64>> {
    check_frequency(base_hz)?;
    check_duration(duration_secs)?;
    check_pulses_per_cycle(pulses_per_cycle)?;
    if !(amplitude_hz.is_finite() && amplitude_hz.abs() < base_hz) {
        return Err(PatternError::InvalidFrequency(base_hz - amplitude_hz.abs()));
    }
    if !(modulation_hz.is_finite() && modulation_hz >= 0.0) {
        return Err(PatternError::InvalidFrequency(modulation_hz));
    }

    let ppc = pulses_per_cycle as f64;
    let mut timestamps = Vec::new();
    let mut t = 0.0_f64;
    while t < duration_secs {
        timestamps.push(start_ns + (t * NANOS_PER_SEC).round() as i64);
        let f = base_hz + amplitude_hz * (2.0 * PI * modulation_hz * t).sin();
        t += 1.0 / (f * ppc);
    }
    Ok(timestamps)
}

/// Remove every pulse inside `[from_ns, to_ns)`.
pub fn with_dropout(timestamps: &[i64], from_ns: i64, to_ns: i64) -> Vec<i64> {
    timestamps
        .iter()
        .copied()
        .filter(|&t| t < from_ns || t >= to_ns)
        .collect()
}

/// Add a spurious edge `bounce_ns` after every `every`-th pulse.
///
/// Models contact bounce / electrical noise the debounce filter must reject.
pub fn with_bounce(timestamps: &[i64], bounce_ns: i64, every: usize) -> Vec<i64> {
    let every = every.max(1);
    let mut out = Vec::with_capacity(timestamps.len() + timestamps.len() / every);
    for (i, &t) in timestamps.iter().enumerate() {
        out.push(t);
        if i % every == 0 {
            out.push(t + bounce_ns);
        }
    }
    out
}

/// Split a train into `ticks` consecutive windows of `tick_ns` starting at `start_ns`.
///
/// Pulses outside the covered span are dropped.
pub fn split_ticks(timestamps: &[i64], start_ns: i64, tick_ns: i64, ticks: usize) -> Vec<Vec<i64>> {
    let mut windows = vec![Vec::new(); ticks];
    if tick_ns <= 0 {
        return windows;
    }
    for &t in timestamps {
        if t < start_ns {
            continue;
        }
        let index = ((t - start_ns) / tick_ns) as usize;
        if let Some(window) = windows.get_mut(index) {
            window.push(t);
        }
    }
    windows
}
