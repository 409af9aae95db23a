// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Power state machine
//!
//! Turns noisy per-tick classifications into one reported [`PowerState`].
//! Each call to [`PowerStateMachine::update`] picks a target:
//!
//! | frequency | signal lost for         | classification | target          |
//! |-----------|-------------------------|----------------|-----------------|
//! | absent    | >= off-grid threshold   | any            | `OffGrid`       |
//! | absent    | < off-grid threshold    | any            | `Transitioning` |
//! | present   |                         | `Grid`         | `Grid`          |
//! | present   |                         | `Generator`    | `Generator`     |
//! | present   |                         | `Unknown`      | `Transitioning` |
//!
//! A target that stays `Transitioning` for longer than the transitioning
//! timeout is replaced by `OffGrid`. An optional confirmation period holds
//! the current state until a new target has been reported continuously for
//! that long; losing the signal and the timeout fallback skip it.
//!
//! Handlers registered with [`PowerStateMachine::on_enter`] run after each
//! committed transition. Their errors and panics are logged and swallowed.

use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::classifier::Classification;
use crate::config::StateMachineConfig;

/// Reported power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PowerState {
    Grid,
    Generator,
    OffGrid,
    /// No trustworthy classification yet
    #[default]
    Transitioning,
}

impl PowerState {
    pub const ALL: [PowerState; 4] = [
        PowerState::Grid,
        PowerState::Generator,
        PowerState::OffGrid,
        PowerState::Transitioning,
    ];

    /// Position in [`PowerState::ALL`]
    pub fn index(self) -> usize {
        match self {
            Self::Grid => 0,
            Self::Generator => 1,
            Self::OffGrid => 2,
            Self::Transitioning => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grid => "GRID",
            Self::Generator => "GENERATOR",
            Self::OffGrid => "OFF_GRID",
            Self::Transitioning => "TRANSITIONING",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// No frequency for at least the off-grid threshold
    SignalLost,
    /// No frequency, still inside the grace period
    SignalGap,
    /// Frequency present and classified
    Classified(Classification),
    /// Frequency present but the classification is unknown
    Ambiguous,
    /// Ambiguous for longer than the transitioning timeout
    TransitioningTimeout,
}

/// A committed state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PowerState,
    pub to: PowerState,
    pub at: Instant,
    pub reason: TransitionReason,
}

/// Error type state-entry handlers may return
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Side effect run when a state is entered (display, LEDs, telemetry, ...)
pub trait StateEntryHandler: Send {
    fn on_enter(&mut self, transition: &Transition) -> Result<(), HandlerError>;
}

impl<F> StateEntryHandler for F
where
    F: FnMut(&Transition) -> Result<(), HandlerError> + Send,
{
    fn on_enter(&mut self, transition: &Transition) -> Result<(), HandlerError> {
        self(transition)
    }
}

/// Snapshot of the machine for status displays
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateInfo {
    pub current_state: PowerState,
    pub previous_state: Option<PowerState>,
    pub time_in_state: Duration,
    pub transitioning_timeout: Duration,
    pub last_classification: Option<Classification>,
}

/// Hysteresis state machine; driven from a single analysis loop
pub struct PowerStateMachine {
    config: StateMachineConfig,
    current: PowerState,
    previous: Option<PowerState>,
    entered_at: Instant,
    last_classification: Option<Classification>,
    /// Start of the current run of `Transitioning` targets
    ambiguous_since: Option<Instant>,
    /// Target waiting out the confirmation period
    pending: Option<(PowerState, Instant)>,
    handlers: [Vec<Box<dyn StateEntryHandler>>; 4],
}

impl PowerStateMachine {
    pub fn new(config: StateMachineConfig) -> Self {
        Self::with_start(config, Instant::now())
    }

    /// Create a machine whose initial `Transitioning` state began at `start`
    pub fn with_start(config: StateMachineConfig, start: Instant) -> Self {
        Self {
            config,
            current: PowerState::Transitioning,
            previous: None,
            entered_at: start,
            last_classification: None,
            ambiguous_since: Some(start),
            pending: None,
            handlers: Default::default(),
        }
    }

    /// Run `handler` every time `state` is entered
    pub fn on_enter<H>(&mut self, state: PowerState, handler: H)
    where
        H: StateEntryHandler + 'static,
    {
        self.handlers[state.index()].push(Box::new(handler));
    }

    pub fn current_state(&self) -> PowerState {
        self.current
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    pub fn update(
        &mut self,
        frequency: Option<f64>,
        classification: Classification,
        zero_signal_duration: Duration,
    ) -> PowerState {
        self.update_at(Instant::now(), frequency, classification, zero_signal_duration)
    }

    /// [`update`](Self::update) with an explicit clock
    pub fn update_at(
        &mut self,
        now: Instant,
        frequency: Option<f64>,
        classification: Classification,
        zero_signal_duration: Duration,
    ) -> PowerState {
        self.last_classification = Some(classification);

        let (target, reason) = self.target(now, frequency, classification, zero_signal_duration);

        if target == self.current {
            self.pending = None;
            return self.current;
        }

        let confirmation = self.config.confirmation();
        let immediate = confirmation.is_zero()
            || matches!(
                reason,
                TransitionReason::SignalLost | TransitionReason::TransitioningTimeout
            );
        if !immediate {
            match self.pending {
                Some((pending, since)) if pending == target => {
                    if now.saturating_duration_since(since) < confirmation {
                        return self.current;
                    }
                }
                _ => {
                    self.pending = Some((target, now));
                    return self.current;
                }
            }
        }

        self.pending = None;
        self.transition(now, target, reason);
        self.current
    }

    fn target(
        &mut self,
        now: Instant,
        frequency: Option<f64>,
        classification: Classification,
        zero_signal_duration: Duration,
    ) -> (PowerState, TransitionReason) {
        let (target, reason) = match frequency.filter(|f| f.is_finite()) {
            None if zero_signal_duration >= self.config.off_grid_threshold() => {
                (PowerState::OffGrid, TransitionReason::SignalLost)
            }
            None => (PowerState::Transitioning, TransitionReason::SignalGap),
            Some(_) => match classification {
                Classification::Grid => (PowerState::Grid, TransitionReason::Classified(classification)),
                Classification::Generator => {
                    (PowerState::Generator, TransitionReason::Classified(classification))
                }
                Classification::Unknown => (PowerState::Transitioning, TransitionReason::Ambiguous),
            },
        };

        if target != PowerState::Transitioning {
            self.ambiguous_since = None;
            return (target, reason);
        }

        let since = *self.ambiguous_since.get_or_insert(now);
        if now.saturating_duration_since(since) > self.config.transitioning_timeout() {
            (PowerState::OffGrid, TransitionReason::TransitioningTimeout)
        } else {
            (target, reason)
        }
    }

    fn transition(&mut self, now: Instant, to: PowerState, reason: TransitionReason) {
        let from = self.current;
        let time_in_previous = now.saturating_duration_since(self.entered_at);
        self.previous = Some(from);
        self.current = to;
        self.entered_at = now;

        if reason == TransitionReason::TransitioningTimeout {
            warn!(
                "Transitioning for more than {:?}, falling back to {}",
                self.config.transitioning_timeout(),
                to
            );
        }
        info!(
            "Power state {} -> {} ({:?}, {:.1}s in previous state)",
            from,
            to,
            reason,
            time_in_previous.as_secs_f64()
        );

        let transition = Transition {
            from,
            to,
            at: now,
            reason,
        };
        for handler in self.handlers[to.index()].iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| handler.on_enter(&transition))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("State entry handler for {} failed: {}", to, e),
                Err(_) => error!("State entry handler for {} panicked", to),
            }
        }
    }

    pub fn get_state_info(&self) -> StateInfo {
        self.state_info_at(Instant::now())
    }

    pub fn state_info_at(&self, now: Instant) -> StateInfo {
        StateInfo {
            current_state: self.current,
            previous_state: self.previous,
            time_in_state: now.saturating_duration_since(self.entered_at),
            transitioning_timeout: self.config.transitioning_timeout(),
            last_classification: self.last_classification,
        }
    }
}

impl fmt::Debug for PowerStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerStateMachine")
            .field("current", &self.current)
            .field("previous", &self.previous)
            .field("entered_at", &self.entered_at)
            .field("pending", &self.pending)
            .field(
                "handlers",
                &self.handlers.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const GRID: Classification = Classification::Grid;
    const GENERATOR: Classification = Classification::Generator;
    const UNKNOWN: Classification = Classification::Unknown;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn machine() -> (PowerStateMachine, Instant) {
        let start = Instant::now();
        (
            PowerStateMachine::with_start(StateMachineConfig::default(), start),
            start,
        )
    }

    #[test]
    fn test_initial_state() {
        let (sm, start) = machine();
        let info = sm.state_info_at(start + secs(1.0));
        assert_eq!(info.current_state, PowerState::Transitioning);
        assert_eq!(info.previous_state, None);
        assert_eq!(info.time_in_state, secs(1.0));
        assert_eq!(info.transitioning_timeout, secs(30.0));
    }

    #[test]
    fn test_classified_transitions() {
        let (mut sm, start) = machine();
        assert_eq!(sm.update_at(start, Some(60.0), GRID, Duration::ZERO), PowerState::Grid);
        assert_eq!(
            sm.update_at(start + secs(1.0), Some(60.3), GENERATOR, Duration::ZERO),
            PowerState::Generator
        );
        assert_eq!(
            sm.update_at(start + secs(2.0), Some(60.0), UNKNOWN, Duration::ZERO),
            PowerState::Transitioning
        );
        let info = sm.state_info_at(start + secs(2.5));
        assert_eq!(info.previous_state, Some(PowerState::Generator));
        assert_eq!(info.time_in_state, secs(0.5));
        assert_eq!(info.last_classification, Some(UNKNOWN));
    }

    #[test]
    fn test_signal_loss_grace_then_off_grid() {
        let (mut sm, start) = machine();
        sm.update_at(start, Some(60.0), GRID, Duration::ZERO);

        assert_eq!(
            sm.update_at(start + secs(4.9), None, GRID, secs(4.9)),
            PowerState::Transitioning
        );
        assert_eq!(
            sm.update_at(start + secs(5.0), None, GRID, secs(5.0)),
            PowerState::OffGrid
        );
    }

    #[test]
    fn test_signal_lost_overrides_any_state() {
        let (mut sm, start) = machine();
        sm.update_at(start, Some(60.0), GENERATOR, Duration::ZERO);
        assert_eq!(
            sm.update_at(start + secs(0.5), None, GENERATOR, secs(7.0)),
            PowerState::OffGrid
        );
    }

    #[test]
    fn test_transitioning_timeout_forces_off_grid() {
        let (mut sm, start) = machine();
        sm.update_at(start, Some(60.0), GRID, Duration::ZERO);

        let ambiguous_from = start + secs(1.0);
        for k in 0..=60 {
            let now = ambiguous_from + secs(k as f64 * 0.5);
            let state = sm.update_at(now, Some(60.0), UNKNOWN, Duration::ZERO);
            assert_eq!(state, PowerState::Transitioning, "tick {}", k);
        }
        let state = sm.update_at(ambiguous_from + secs(30.5), Some(60.0), UNKNOWN, Duration::ZERO);
        assert_eq!(state, PowerState::OffGrid);

        // Stays off grid while the ambiguity persists
        let state = sm.update_at(ambiguous_from + secs(31.0), Some(60.0), UNKNOWN, Duration::ZERO);
        assert_eq!(state, PowerState::OffGrid);

        // A resolving classification ends it
        let state = sm.update_at(ambiguous_from + secs(31.5), Some(60.0), GRID, Duration::ZERO);
        assert_eq!(state, PowerState::Grid);
    }

    #[test]
    fn test_initial_ambiguity_times_out() {
        let (mut sm, start) = machine();
        assert_eq!(
            sm.update_at(start + secs(29.0), Some(60.0), UNKNOWN, Duration::ZERO),
            PowerState::Transitioning
        );
        assert_eq!(
            sm.update_at(start + secs(31.0), Some(60.0), UNKNOWN, Duration::ZERO),
            PowerState::OffGrid
        );
    }

    #[test]
    fn test_non_finite_frequency_is_absent() {
        let (mut sm, start) = machine();
        assert_eq!(
            sm.update_at(start, Some(f64::NAN), GRID, Duration::ZERO),
            PowerState::Transitioning
        );
    }

    #[test]
    fn test_confirmation_period() {
        let config = StateMachineConfig {
            confirmation_ms: 5_000,
            ..Default::default()
        };
        let start = Instant::now();
        let mut sm = PowerStateMachine::with_start(config, start);

        assert_eq!(sm.update_at(start, Some(60.0), GRID, Duration::ZERO), PowerState::Transitioning);
        assert_eq!(
            sm.update_at(start + secs(4.0), Some(60.0), GRID, Duration::ZERO),
            PowerState::Transitioning
        );
        assert_eq!(sm.update_at(start + secs(5.0), Some(60.0), GRID, Duration::ZERO), PowerState::Grid);

        // An interrupted run restarts the confirmation clock
        sm.update_at(start + secs(6.0), Some(60.0), GENERATOR, Duration::ZERO);
        sm.update_at(start + secs(7.0), Some(60.0), GRID, Duration::ZERO);
        assert_eq!(
            sm.update_at(start + secs(10.0), Some(60.0), GENERATOR, Duration::ZERO),
            PowerState::Grid
        );

        // Signal loss is never delayed
        assert_eq!(sm.update_at(start + secs(11.0), None, GRID, secs(6.0)), PowerState::OffGrid);
    }

    #[test]
    fn test_handlers_run_on_entry() {
        let (mut sm, start) = machine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        sm.on_enter(PowerState::Generator, move |t: &Transition| -> Result<(), HandlerError> {
            log.lock().unwrap().push((t.from, t.to));
            Ok(())
        });

        sm.update_at(start, Some(60.0), GRID, Duration::ZERO);
        sm.update_at(start + secs(1.0), Some(61.0), GENERATOR, Duration::ZERO);
        // Same state again: no new entry
        sm.update_at(start + secs(2.0), Some(61.0), GENERATOR, Duration::ZERO);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(PowerState::Grid, PowerState::Generator)]
        );
    }

    #[test]
    fn test_failing_handlers_do_not_corrupt_state() {
        let (mut sm, start) = machine();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        sm.on_enter(PowerState::Grid, |_: &Transition| -> Result<(), HandlerError> {
            Err("display offline".into())
        });
        sm.on_enter(PowerState::Grid, |_: &Transition| -> Result<(), HandlerError> {
            panic!("led driver crashed")
        });
        sm.on_enter(PowerState::Grid, move |_: &Transition| -> Result<(), HandlerError> {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        assert_eq!(sm.update_at(start, Some(60.0), GRID, Duration::ZERO), PowerState::Grid);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(sm.current_state(), PowerState::Grid);
        assert_eq!(
            sm.update_at(start + secs(1.0), Some(60.0), GENERATOR, Duration::ZERO),
            PowerState::Generator
        );
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PowerState::OffGrid.to_string(), "OFF_GRID");
        for (i, state) in PowerState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
        }
    }
}
