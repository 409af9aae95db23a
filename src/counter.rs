// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pulse-counter capability
//!
//! The analysis pipeline only sees [`PulseCounter`]. The backend is picked
//! once at startup by [`select_counter`]: the event-driven aggregator when an
//! edge source could be opened, otherwise a [`DisabledCounter`] that keeps the
//! pipeline running in a no-pulse, degraded mode.

use std::sync::Arc;

use log::warn;

use crate::aggregator::PulseAggregator;
use crate::channel::EventStatistics;
use crate::config::{ChannelConfig, SourceConfig};
use crate::error::{GridSenseError, Result};
use crate::health::{HealthCheck, HealthCheckable};
use crate::source::{ChannelId, EdgeEventSource};

/// Operations every pulse-counting backend provides
pub trait PulseCounter: HealthCheckable + Send + Sync {
    fn register(&self, channel_id: ChannelId, config: ChannelConfig) -> Result<()>;
    fn get_count(&self, channel_id: ChannelId) -> u64;
    fn get_timestamps(&self, channel_id: ChannelId) -> Vec<i64>;
    fn take_timestamps(&self, channel_id: ChannelId) -> Vec<i64>;
    fn reset(&self, channel_id: ChannelId) -> Result<()>;
    fn get_event_statistics(
        &self,
        channel_id: ChannelId,
        include_intervals: bool,
    ) -> Option<EventStatistics>;
    fn cleanup(&self);
    fn is_available(&self) -> bool;
}

impl PulseCounter for PulseAggregator {
    fn register(&self, channel_id: ChannelId, config: ChannelConfig) -> Result<()> {
        PulseAggregator::register(self, channel_id, config)
    }

    fn get_count(&self, channel_id: ChannelId) -> u64 {
        PulseAggregator::get_count(self, channel_id)
    }

    fn get_timestamps(&self, channel_id: ChannelId) -> Vec<i64> {
        PulseAggregator::get_timestamps(self, channel_id)
    }

    fn take_timestamps(&self, channel_id: ChannelId) -> Vec<i64> {
        PulseAggregator::take_timestamps(self, channel_id)
    }

    fn reset(&self, channel_id: ChannelId) -> Result<()> {
        PulseAggregator::reset(self, channel_id)
    }

    fn get_event_statistics(
        &self,
        channel_id: ChannelId,
        include_intervals: bool,
    ) -> Option<EventStatistics> {
        PulseAggregator::get_event_statistics(self, channel_id, include_intervals)
    }

    fn cleanup(&self) {
        PulseAggregator::cleanup(self)
    }

    fn is_available(&self) -> bool {
        PulseAggregator::is_available(self)
    }
}

/// No-op counter used when no edge source is available
#[derive(Debug, Clone)]
pub struct DisabledCounter {
    reason: String,
}

impl DisabledCounter {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl PulseCounter for DisabledCounter {
    fn register(&self, _channel_id: ChannelId, _config: ChannelConfig) -> Result<()> {
        Err(GridSenseError::unavailable(self.reason.clone()))
    }

    fn get_count(&self, _channel_id: ChannelId) -> u64 {
        0
    }

    fn get_timestamps(&self, _channel_id: ChannelId) -> Vec<i64> {
        Vec::new()
    }

    fn take_timestamps(&self, _channel_id: ChannelId) -> Vec<i64> {
        Vec::new()
    }

    fn reset(&self, channel_id: ChannelId) -> Result<()> {
        Err(GridSenseError::ChannelNotFound(channel_id))
    }

    fn get_event_statistics(
        &self,
        _channel_id: ChannelId,
        _include_intervals: bool,
    ) -> Option<EventStatistics> {
        None
    }

    fn cleanup(&self) {}

    fn is_available(&self) -> bool {
        false
    }
}

impl HealthCheckable for DisabledCounter {
    fn health_check(&self) -> HealthCheck {
        HealthCheck::unhealthy("pulse_counter", format!("disabled: {}", self.reason))
    }
}

/// Pick the counting backend once, from the outcome of opening the source.
///
/// Opening failures never abort startup; they select the disabled counter.
pub fn select_counter(
    source: Result<Box<dyn EdgeEventSource>>,
    config: &SourceConfig,
) -> Arc<dyn PulseCounter> {
    match source {
        Ok(source) if source.is_available() => {
            Arc::new(PulseAggregator::with_config(source, config))
        }
        Ok(source) => {
            warn!("Edge source {} unavailable, pulse counting disabled", source.name());
            Arc::new(DisabledCounter::new(format!("{} unavailable", source.name())))
        }
        Err(e) => {
            warn!("Pulse counting disabled: {}", e);
            Arc::new(DisabledCounter::new(e.to_string()))
        }
    }
}
