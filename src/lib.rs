//! # GridSense - AC power source classification
//!
//! Tells a utility grid from a backup generator (or no power at all) by timing
//! the zero crossings of the AC line through an optocoupler wired to a GPIO
//! input.
//!
//! ## Key Features
//!
//! - **Event-driven acquisition**: kernel-timestamped rising edges, software debounce
//! - **Jitter-robust frequency**: least-squares fit over every pulse in a tick
//! - **Stability statistics**: Allan variance, standard deviation, kurtosis
//! - **Hysteresis state machine**: grace period, timeout fallback, entry handlers
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//! use gridsense::{DisabledCounter, MonitorConfig, PowerMonitor, PowerState, PulseCounter};
//!
//! // No GPIO on this machine: the monitor still runs, it just sees no pulses
//! let counter: Arc<dyn PulseCounter> = Arc::new(DisabledCounter::new("no gpio"));
//! let start = Instant::now();
//! let mut monitor = PowerMonitor::with_start(&MonitorConfig::default(), counter, start).unwrap();
//!
//! let report = monitor.tick_at(start + Duration::from_secs(6));
//! assert_eq!(report.state, PowerState::OffGrid);
//! ```
//!
//! ## Modules
//!
//! - [`source`]: Edge-event sources (in-memory, Linux GPIO character device)
//! - [`aggregator`]: Drain thread, debounce, per-channel counters
//! - [`counter`]: Backend-agnostic pulse-counter capability
//! - [`frequency`]: Two-point and regression estimators
//! - [`stability`]: Sliding-window stability metrics
//! - [`classifier`]: Threshold classification
//! - [`state_machine`]: Reported power state
//! - [`monitor`]: One analysis tick, end to end

pub mod aggregator;
pub mod channel;
pub mod classifier;
pub mod config;
pub mod counter;
pub mod error;
pub mod frequency;
pub mod health;
pub mod monitor;
pub mod source;
pub mod stability;
pub mod state_machine;

pub use aggregator::{PulseAggregator, MAX_CHANNELS};
pub use channel::{EventStatistics, IntervalStats};
pub use classifier::{classify, Classification, SourceClassifier};
pub use config::{
    AnalysisConfig, ChannelConfig, ClassifierThresholds, MonitorConfig, SourceConfig,
    StateMachineConfig,
};
pub use counter::{select_counter, DisabledCounter, PulseCounter};
pub use error::{GridSenseError, Result};
pub use frequency::{EstimationMethod, FrequencyEstimator};
pub use health::{HealthCheck, HealthCheckable, HealthStatus};
pub use monitor::{PowerMonitor, TickReport};
pub use source::{open_source, Bias, ChannelId, EdgeEvent, EdgeEventSource};
pub use stability::{StabilityAnalyzer, StabilityMetrics};
pub use state_machine::{
    HandlerError, PowerState, PowerStateMachine, StateEntryHandler, StateInfo, Transition,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
