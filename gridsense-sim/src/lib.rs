// GridSense Sim - Synthetic pulse trains
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # GridSense Sim
//!
//! Synthetic zero-crossing pulse trains for exercising the GridSense pipeline
//! without a wired optocoupler.
//!
//! - **Patterns**: stable mains, Gaussian edge jitter, governor hunting, silence
//! - **Distortions**: dropouts, contact bounce
//! - **Site scripts**: grid / outage / generator sequences rendered into one train
//!
//! ## Quick Start
//!
//! ```rust
//! use gridsense_sim::patterns::{stable, split_ticks};
//!
//! // 10 s of 60 Hz from a full-wave sensor (2 pulses per cycle)
//! let train = stable(60.0, 10.0, 2, 0).unwrap();
//! assert_eq!(train.len(), 1200);
//!
//! // Chop into 0.5 s analysis ticks
//! let ticks = split_ticks(&train, 0, 500_000_000, 20);
//! assert_eq!(ticks[0].len(), 60);
//! ```

pub mod patterns;
pub mod site;

pub use patterns::{PatternError, PulsePattern};
pub use site::{Phase, SiteScript, SupplyKind};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
