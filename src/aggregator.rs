// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Event-driven pulse aggregation
//!
//! One background thread blocks on the [`EdgeEventSource`], drains every
//! queued edge in a batch and runs it through the per-channel debounce filter.
//! Every counter and timestamp log sits behind a single mutex; readers take
//! snapshot copies under that mutex and do their arithmetic outside it.
//!
//! Registering a channel while the thread runs stops it, rebuilds the line
//! request and starts it again. The first registration starts the thread.
//!
//! ```rust
//! use gridsense::aggregator::PulseAggregator;
//! use gridsense::config::ChannelConfig;
//! use gridsense::source::mock::MockEdgeSource;
//!
//! let source = MockEdgeSource::new();
//! let aggregator = PulseAggregator::new(Box::new(source.clone()));
//! aggregator.register(26, ChannelConfig::default()).unwrap();
//! assert!(aggregator.is_running());
//! aggregator.cleanup();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use crate::channel::{interval_stats, Channel, EventOutcome, EventStatistics};
use crate::config::{ChannelConfig, SourceConfig};
use crate::error::{GridSenseError, Result};
use crate::health::{HealthCheck, HealthCheckable};
use crate::source::{ChannelId, EdgeDirection, EdgeEvent, EdgeEventSource};

/// Hardware wiring supports this many sensors at once
pub const MAX_CHANNELS: usize = 2;

/// Accepted events logged at debug level per channel after (re)start
const LOGGED_EVENTS: u64 = 10;

/// Pause after a failed wait/read before retrying
const RETRY_DELAY: Duration = Duration::from_millis(10);

struct Shared {
    channels: Mutex<HashMap<ChannelId, Channel>>,
    source: Mutex<Box<dyn EdgeEventSource>>,
    running: AtomicBool,
    available: AtomicBool,
    io_errors: AtomicU64,
    wait_timeout: Duration,
}

impl Shared {
    fn process_batch(&self, events: &[EdgeEvent]) {
        let mut channels = self.channels.lock();
        for event in events {
            if event.direction != EdgeDirection::Rising {
                continue;
            }
            let channel = match channels.get_mut(&event.channel_id) {
                Some(channel) => channel,
                None => continue,
            };
            match channel.process(event.timestamp_ns) {
                EventOutcome::Accepted if channel.accepted() <= LOGGED_EVENTS => {
                    debug!(
                        "Channel {}: pulse #{} at {} ns",
                        event.channel_id,
                        channel.accepted(),
                        event.timestamp_ns
                    );
                }
                EventOutcome::Accepted => {}
                EventOutcome::Debounced => {
                    trace!(
                        "Channel {}: edge at {} ns debounced",
                        event.channel_id,
                        event.timestamp_ns
                    );
                }
            }
        }
    }
}

fn drain_loop(shared: Arc<Shared>) {
    info!("Edge event drain loop started");
    while shared.running.load(Ordering::Acquire) {
        let batch = {
            let mut source = shared.source.lock();
            match source.wait(shared.wait_timeout) {
                Ok(false) => continue,
                Ok(true) => source.read(),
                Err(e) => Err(e),
            }
        };

        match batch {
            Ok(events) => shared.process_batch(&events),
            Err(e) => {
                shared.io_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Edge event read failed, retrying: {}", e);
                thread::sleep(RETRY_DELAY);
            }
        }
    }
    info!("Edge event drain loop stopped");
}

/// Debounced pulse counters for up to [`MAX_CHANNELS`] GPIO lines
pub struct PulseAggregator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PulseAggregator {
    /// Create an aggregator with the default wait timeout
    pub fn new(source: Box<dyn EdgeEventSource>) -> Self {
        Self::with_config(source, &SourceConfig::default())
    }

    /// Create an aggregator using the timing in `config`
    pub fn with_config(source: Box<dyn EdgeEventSource>, config: &SourceConfig) -> Self {
        let available = source.is_available();
        Self {
            shared: Arc::new(Shared {
                channels: Mutex::new(HashMap::new()),
                source: Mutex::new(source),
                running: AtomicBool::new(false),
                available: AtomicBool::new(available),
                io_errors: AtomicU64::new(0),
                wait_timeout: config.wait_timeout(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start counting rising edges on `channel_id`.
    ///
    /// Registering an already registered channel is a no-op. If the line
    /// request cannot be rebuilt, the error is returned and the channels that
    /// were already registered keep counting.
    pub fn register(&self, channel_id: ChannelId, config: ChannelConfig) -> Result<()> {
        config.validate()?;
        if !self.is_available() {
            return Err(GridSenseError::unavailable("edge source unavailable"));
        }

        let mut worker = self.worker.lock();
        {
            let channels = self.shared.channels.lock();
            if channels.contains_key(&channel_id) {
                debug!("Channel {} already registered", channel_id);
                return Ok(());
            }
            if channels.len() >= MAX_CHANNELS {
                return Err(GridSenseError::MaxChannelsReached { max: MAX_CHANNELS });
            }
        }

        let was_running = self.stop_locked(&mut worker);
        let result = self.shared.source.lock().register(channel_id, config.bias);

        match result {
            Ok(()) => {
                info!(
                    "Channel {} registered (debounce {} ns, bias {:?})",
                    channel_id, config.debounce_ns, config.bias
                );
                self.shared
                    .channels
                    .lock()
                    .insert(channel_id, Channel::new(config));
                self.start_locked(&mut worker)
            }
            Err(e) => {
                error!("Failed to register channel {}: {}", channel_id, e);
                if e.is_unavailable() {
                    self.shared.available.store(false, Ordering::Release);
                }
                if was_running {
                    if let Err(restart) = self.start_locked(&mut worker) {
                        error!("Failed to restart edge event drain loop: {}", restart);
                    }
                }
                Err(e)
            }
        }
    }

    fn start_locked(&self, worker: &mut Option<JoinHandle<()>>) -> Result<()> {
        if worker.is_some() {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("gpio-events".to_string())
            .spawn(move || drain_loop(shared))
        {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(GridSenseError::Io(e))
            }
        }
    }

    /// Stop the drain thread; returns whether it was running.
    fn stop_locked(&self, worker: &mut Option<JoinHandle<()>>) -> bool {
        self.shared.running.store(false, Ordering::Release);
        match worker.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    error!("Edge event drain loop panicked");
                }
                true
            }
            None => false,
        }
    }

    /// Accepted pulses since registration or the last reset (0 if unknown)
    pub fn get_count(&self, channel_id: ChannelId) -> u64 {
        self.shared
            .channels
            .lock()
            .get(&channel_id)
            .map_or(0, Channel::accepted)
    }

    /// Snapshot copy of the timestamp log, in nanoseconds
    pub fn get_timestamps(&self, channel_id: ChannelId) -> Vec<i64> {
        self.shared
            .channels
            .lock()
            .get(&channel_id)
            .map(Channel::timestamps)
            .unwrap_or_default()
    }

    /// Drain the timestamp log; counters and debounce state are kept
    pub fn take_timestamps(&self, channel_id: ChannelId) -> Vec<i64> {
        self.shared
            .channels
            .lock()
            .get_mut(&channel_id)
            .map(Channel::take_timestamps)
            .unwrap_or_default()
    }

    /// Zero counters and clear the log in one critical section
    pub fn reset(&self, channel_id: ChannelId) -> Result<()> {
        let mut channels = self.shared.channels.lock();
        let channel = channels
            .get_mut(&channel_id)
            .ok_or(GridSenseError::ChannelNotFound(channel_id))?;
        channel.reset();
        Ok(())
    }

    /// Counter snapshot; interval figures cost a sort, so they are opt-in
    pub fn get_event_statistics(
        &self,
        channel_id: ChannelId,
        include_intervals: bool,
    ) -> Option<EventStatistics> {
        let (mut stats, generation, snapshot) = {
            let channels = self.shared.channels.lock();
            let channel = channels.get(&channel_id)?;
            let mut stats = channel.counters();
            if !include_intervals {
                return Some(stats);
            }
            if let Some(cached) = channel.cached_intervals() {
                stats.intervals = cached;
                return Some(stats);
            }
            (stats, channel.generation(), channel.timestamps())
        };

        // Sorting happens outside the lock
        stats.intervals = interval_stats(&snapshot);
        if let Some(channel) = self.shared.channels.lock().get_mut(&channel_id) {
            channel.cache_intervals(generation, stats.intervals);
        }
        Some(stats)
    }

    /// Registered channel ids, sorted
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.shared.channels.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Stop the thread, release the hardware request and drop every channel
    pub fn cleanup(&self) {
        let mut worker = self.worker.lock();
        self.stop_locked(&mut worker);
        self.shared.source.lock().release();
        self.shared.channels.lock().clear();
        info!("Pulse aggregator cleaned up");
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some() && self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::Acquire)
    }

    /// Failed wait/read calls since construction
    pub fn io_errors(&self) -> u64 {
        self.shared.io_errors.load(Ordering::Relaxed)
    }
}

impl Drop for PulseAggregator {
    fn drop(&mut self) {
        let mut worker = self.worker.lock();
        self.stop_locked(&mut worker);
    }
}

impl HealthCheckable for PulseAggregator {
    fn health_check(&self) -> HealthCheck {
        const COMPONENT: &str = "pulse_aggregator";

        if !self.is_available() {
            return HealthCheck::unhealthy(COMPONENT, "edge source unavailable");
        }
        if !self.is_running() {
            return HealthCheck::degraded(COMPONENT, "drain loop not running");
        }

        let (received, rejected) = self
            .shared
            .channels
            .lock()
            .values()
            .fold((0, 0), |(r, j), ch| (r + ch.received(), j + ch.rejected()));
        if received > 0 && rejected * 2 > received {
            return HealthCheck::degraded(
                COMPONENT,
                format!("{} of {} edges debounced", rejected, received),
            );
        }

        HealthCheck::healthy(COMPONENT)
            .with_message(format!("{} edges received", received))
    }
}
