// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! One analysis tick, end to end
//!
//! [`PowerMonitor::tick`] drains the pulses collected since the previous tick,
//! estimates the frequency, feeds the stability window, classifies the source
//! and advances the state machine. Scheduling the ticks (twice a second by
//! default) is left to the application.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::classifier::{Classification, SourceClassifier};
use crate::config::MonitorConfig;
use crate::counter::PulseCounter;
use crate::error::Result;
use crate::frequency::FrequencyEstimator;
use crate::health::{HealthCheck, HealthCheckable, HealthStatus};
use crate::source::ChannelId;
use crate::stability::{StabilityAnalyzer, StabilityMetrics};
use crate::state_machine::{PowerState, PowerStateMachine, StateInfo};

/// What one tick saw and decided
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub at: Instant,
    /// Pulses drained for this tick
    pub pulses: usize,
    /// Whether the pulse count was implausible and the tick ignored
    pub discarded: bool,
    pub frequency: Option<f64>,
    pub metrics: Option<StabilityMetrics>,
    pub classification: Classification,
    pub zero_signal_duration: Duration,
    pub state: PowerState,
}

/// Composition root of the analysis pipeline for one sensor
pub struct PowerMonitor {
    counter: Arc<dyn PulseCounter>,
    channel_id: ChannelId,
    estimator: FrequencyEstimator,
    analyzer: StabilityAnalyzer,
    classifier: SourceClassifier,
    state_machine: PowerStateMachine,
    signal_lost_since: Option<Instant>,
    last_tick: Instant,
    ticks: u64,
    last_report: Option<TickReport>,
}

impl PowerMonitor {
    pub fn new(config: &MonitorConfig, counter: Arc<dyn PulseCounter>) -> Result<Self> {
        Self::with_start(config, counter, Instant::now())
    }

    /// Create a monitor whose clock starts at `start`.
    ///
    /// Registers the sensor channel. An unavailable counter is tolerated: the
    /// monitor then sees no pulses and reports `OffGrid` after the threshold.
    pub fn with_start(
        config: &MonitorConfig,
        counter: Arc<dyn PulseCounter>,
        start: Instant,
    ) -> Result<Self> {
        config.validate()?;

        match counter.register(config.channel_id, config.channel.clone()) {
            Ok(()) => {}
            Err(e) if e.is_unavailable() => {
                warn!("Monitoring without pulse input: {}", e);
            }
            Err(e) => return Err(e),
        }

        info!(
            "Power monitor started on channel {} ({} Hz nominal, {} pulses/cycle)",
            config.channel_id, config.analysis.nominal_frequency, config.analysis.pulses_per_cycle
        );

        Ok(Self {
            counter,
            channel_id: config.channel_id,
            estimator: FrequencyEstimator::from_config(&config.analysis),
            analyzer: StabilityAnalyzer::from_config(&config.analysis),
            classifier: SourceClassifier::new(config.thresholds),
            state_machine: PowerStateMachine::with_start(config.state_machine.clone(), start),
            signal_lost_since: Some(start),
            last_tick: start,
            ticks: 0,
            last_report: None,
        })
    }

    pub fn tick(&mut self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// Run one analysis tick at `now`
    pub fn tick_at(&mut self, now: Instant) -> TickReport {
        let timestamps = self.counter.take_timestamps(self.channel_id);
        let pulses = timestamps.len();
        let previous_tick = self.last_tick;
        let elapsed = now.saturating_duration_since(previous_tick);
        self.last_tick = now;
        self.ticks += 1;

        let mut frequency = None;
        let mut discarded = false;
        if pulses == 0 {
            // Pulses may have stopped any time after the previous tick
            self.signal_lost_since.get_or_insert(previous_tick);
        } else {
            self.signal_lost_since = None;
            if self.estimator.validate_pulse_count(pulses, elapsed) {
                frequency = self.estimator.estimate(&timestamps);
            } else {
                discarded = true;
                warn!(
                    "Implausible pulse count {} in {:.3}s, tick ignored",
                    pulses,
                    elapsed.as_secs_f64()
                );
            }
        }

        if let Some(f) = frequency {
            self.analyzer.push(f, now);
        }
        let metrics = self.analyzer.analyze();
        let classification = self.classifier.classify_metrics(metrics.as_ref());

        let zero_signal_duration = self
            .signal_lost_since
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));

        let before = self.state_machine.current_state();
        let state =
            self.state_machine
                .update_at(now, frequency, classification, zero_signal_duration);
        if state == PowerState::OffGrid && before != PowerState::OffGrid {
            // Stale samples must not classify whatever comes back
            self.analyzer.clear();
        }

        debug!(
            "Tick {}: {} pulses, frequency {:?}, {:?}, {} -> {}",
            self.ticks, pulses, frequency, metrics, classification, state
        );

        let report = TickReport {
            at: now,
            pulses,
            discarded,
            frequency,
            metrics,
            classification,
            zero_signal_duration,
            state,
        };
        self.last_report = Some(report);
        report
    }

    pub fn current_state(&self) -> PowerState {
        self.state_machine.current_state()
    }

    pub fn state_info(&self) -> StateInfo {
        self.state_machine.get_state_info()
    }

    pub fn state_machine(&self) -> &PowerStateMachine {
        &self.state_machine
    }

    /// Mutable access, for registering state-entry handlers
    pub fn state_machine_mut(&mut self) -> &mut PowerStateMachine {
        &mut self.state_machine
    }

    pub fn analyzer(&self) -> &StabilityAnalyzer {
        &self.analyzer
    }

    pub fn counter(&self) -> &Arc<dyn PulseCounter> {
        &self.counter
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }
}

impl HealthCheckable for PowerMonitor {
    fn health_check(&self) -> HealthCheck {
        let counter = self.counter.health_check();
        let own = match &self.last_report {
            Some(report) if report.discarded => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };
        let status = counter.status.worst(own);

        let message = match status {
            HealthStatus::Healthy => format!(
                "{} after {} ticks",
                self.current_state(),
                self.ticks
            ),
            _ if !counter.status.is_healthy() => {
                format!("{}: {}", counter.component, counter.message)
            }
            _ => "implausible pulse count on last tick".to_string(),
        };
        HealthCheck::new("power_monitor", status, message)
    }
}
