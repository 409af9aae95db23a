// GridSense Sim - Site scenarios
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scripted sequences of power conditions at a site.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::patterns::{PulsePattern, Result};

/// What is actually feeding the site during a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupplyKind {
    Grid,
    Generator,
    Outage,
}

/// One stretch of constant conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub supply: SupplyKind,
    pub pattern: PulsePattern,
    pub duration_secs: f64,
}

impl Phase {
    pub fn new(supply: SupplyKind, pattern: PulsePattern, duration_secs: f64) -> Self {
        Self {
            supply,
            pattern,
            duration_secs,
        }
    }
}

/// Back-to-back phases rendered into one continuous pulse train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteScript {
    pub phases: Vec<Phase>,
    pub pulses_per_cycle: u32,
    pub seed: u64,
}

impl SiteScript {
    pub fn new(pulses_per_cycle: u32, seed: u64) -> Self {
        Self {
            phases: Vec::new(),
            pulses_per_cycle,
            seed,
        }
    }

    /// Append a phase.
    pub fn then(mut self, supply: SupplyKind, pattern: PulsePattern, duration_secs: f64) -> Self {
        self.phases.push(Phase::new(supply, pattern, duration_secs));
        self
    }

    /// 60 s cycle: grid 20 s, outage 10 s, hunting generator 20 s, grid 10 s.
    pub fn standard_cycle(seed: u64) -> Self {
        let grid = PulsePattern::Jittered {
            frequency_hz: 60.0,
            jitter_std_ns: 2_000.0,
        };
        let generator = PulsePattern::Hunting {
            base_hz: 60.0,
            amplitude_hz: 1.5,
            modulation_hz: 0.5,
        };
        Self::new(2, seed)
            .then(SupplyKind::Grid, grid.clone(), 20.0)
            .then(SupplyKind::Outage, PulsePattern::Silent, 10.0)
            .then(SupplyKind::Generator, generator, 20.0)
            .then(SupplyKind::Grid, grid, 10.0)
    }

    pub fn total_duration_secs(&self) -> f64 {
        self.phases.iter().map(|p| p.duration_secs).sum()
    }

    /// Supply active `elapsed_secs` into the script, `None` past the end.
    pub fn supply_at(&self, elapsed_secs: f64) -> Option<SupplyKind> {
        let mut end = 0.0;
        for phase in &self.phases {
            end += phase.duration_secs;
            if elapsed_secs < end {
                return Some(phase.supply);
            }
        }
        None
    }

    /// Render every phase starting at `start_ns`.
    pub fn render(&self, start_ns: i64) -> Result<Vec<i64>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut timestamps = Vec::new();
        let mut offset_secs = 0.0_f64;

        for phase in &self.phases {
            let phase_start = start_ns + (offset_secs * 1e9).round() as i64;
            let pulses = phase.pattern.generate(
                phase.duration_secs,
                self.pulses_per_cycle,
                phase_start,
                &mut rng,
            )?;
            // Jitter at a phase boundary may land before the previous edge
            for t in pulses {
                if timestamps.last().map_or(true, |&last| t > last) {
                    timestamps.push(t);
                }
            }
            offset_secs += phase.duration_secs;
        }

        Ok(timestamps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_cycle_layout() {
        let script = SiteScript::standard_cycle(42);
        assert_eq!(script.phases.len(), 4);
        assert_eq!(script.total_duration_secs(), 60.0);
        assert_eq!(script.supply_at(0.0), Some(SupplyKind::Grid));
        assert_eq!(script.supply_at(25.0), Some(SupplyKind::Outage));
        assert_eq!(script.supply_at(31.0), Some(SupplyKind::Generator));
        assert_eq!(script.supply_at(55.0), Some(SupplyKind::Grid));
        assert_eq!(script.supply_at(60.0), None);
    }

    #[test]
    fn test_render_has_silent_gap() {
        let script = SiteScript::standard_cycle(42);
        let start = 1_000_000_000;
        let ts = script.render(start).unwrap();

        let outage_from = start + 20_000_000_000;
        let outage_to = start + 30_000_000_000;
        assert!(ts.iter().all(|&t| !(outage_from..outage_to).contains(&t)));
        assert!(ts.windows(2).all(|w| w[1] > w[0]));
        // 50 s of ~120 pulses/s
        assert!(ts.len() > 5900 && ts.len() < 6100);
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = SiteScript::standard_cycle(3).render(0).unwrap();
        let b = SiteScript::standard_cycle(3).render(0).unwrap();
        assert_eq!(a, b);
    }
}
