// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Hardware edge-event acquisition
//!
//! An [`EdgeEventSource`] wraps the operating system's line-request facility:
//! lines are requested for rising-edge detection only, the kernel timestamps
//! each edge at interrupt time, and the drain loop in
//! [`PulseAggregator`](crate::aggregator::PulseAggregator) pulls queued events
//! in batches.
//!
//! Two implementations ship with the crate:
//!
//! - [`mock::MockEdgeSource`]: in-memory, injectable; used by tests and the
//!   simulator
//! - `gpio::GpioChipSource` (feature `hardware`): Linux GPIO character device

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SourceConfig;
use crate::error::Result;

#[cfg(feature = "hardware")]
pub mod gpio;
pub mod mock;

/// GPIO line offset identifying a channel
pub type ChannelId = u32;

/// Line bias requested from the GPIO controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Bias {
    /// Internal pull-up (open-collector optocoupler outputs need one)
    #[default]
    PullUp,
    /// Internal pull-down
    PullDown,
    /// No internal bias; an external resistor is fitted
    Disabled,
}

/// Transition direction of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Rising,
    Falling,
}

/// One hardware-detected edge, consumed once by the drain loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub channel_id: ChannelId,
    /// Monotonic clock, assigned by the kernel at interrupt time
    pub timestamp_ns: i64,
    pub direction: EdgeDirection,
}

impl EdgeEvent {
    pub fn rising(channel_id: ChannelId, timestamp_ns: i64) -> Self {
        Self {
            channel_id,
            timestamp_ns,
            direction: EdgeDirection::Rising,
        }
    }
}

/// Producer of hardware-timestamped edge events.
///
/// Implementations are driven from a single drain thread; `register` is only
/// called while that thread is stopped.
pub trait EdgeEventSource: Send {
    /// Add a line, rebuilding the whole request when one is already active.
    ///
    /// On failure the previously requested lines should stay operative.
    fn register(&mut self, channel_id: ChannelId, bias: Bias) -> Result<()>;

    /// Block until at least one event is queued or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<bool>;

    /// Drain every currently queued event.
    fn read(&mut self) -> Result<Vec<EdgeEvent>>;

    /// Release the request and forget all lines.
    fn release(&mut self);

    /// Lines currently requested
    fn lines(&self) -> Vec<ChannelId>;

    /// Whether the underlying device can be used at all
    fn is_available(&self) -> bool {
        true
    }

    /// Short label for logs
    fn name(&self) -> &str;
}

/// Open the platform edge source described by `config`.
///
/// Without the `hardware` feature this always reports the hardware as
/// unavailable, so callers fall back to a degraded counter.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn EdgeEventSource>> {
    #[cfg(feature = "hardware")]
    {
        let source = gpio::GpioChipSource::open(config.clone())?;
        Ok(Box::new(source))
    }
    #[cfg(not(feature = "hardware"))]
    {
        Err(crate::error::GridSenseError::unavailable(format!(
            "{}: built without the `hardware` feature",
            config.chip_path
        )))
    }
}
