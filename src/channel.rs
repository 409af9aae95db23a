// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-line pulse bookkeeping
//!
//! A [`Channel`] applies the software debounce filter to the edges of one GPIO
//! line and keeps a bounded, oldest-first log of accepted timestamps. Channels
//! are owned by the [`PulseAggregator`](crate::aggregator::PulseAggregator) and
//! only ever touched under its lock.

use std::collections::VecDeque;

use crate::config::ChannelConfig;

/// What the debounce filter did with an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Accepted,
    Debounced,
}

/// Distribution of consecutive-pulse intervals, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    /// Number of intervals the figures are computed from
    pub samples: usize,
}

/// Counter snapshot for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventStatistics {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// Timestamps currently held in the log
    pub count: usize,
    pub intervals: Option<IntervalStats>,
}

/// One registered input line
#[derive(Debug, Clone)]
pub struct Channel {
    config: ChannelConfig,
    received: u64,
    accepted: u64,
    rejected: u64,
    last_accepted_ns: i64,
    timestamps: VecDeque<i64>,
    /// Bumped whenever the log changes (accept, take, reset)
    generation: u64,
    // Interval figures keyed by the log generation they were computed at
    interval_cache: Option<(u64, Option<IntervalStats>)>,
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        let capacity = config.timestamp_capacity.min(8192);
        Self {
            config,
            received: 0,
            accepted: 0,
            rejected: 0,
            last_accepted_ns: 0,
            timestamps: VecDeque::with_capacity(capacity),
            generation: 0,
            interval_cache: None,
        }
    }

    /// Run one edge through the debounce filter.
    pub fn process(&mut self, timestamp_ns: i64) -> EventOutcome {
        self.received += 1;

        if self.last_accepted_ns != 0
            && timestamp_ns - self.last_accepted_ns < self.config.debounce_ns
        {
            self.rejected += 1;
            return EventOutcome::Debounced;
        }

        self.accepted += 1;
        if self.timestamps.len() >= self.config.timestamp_capacity {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(timestamp_ns);
        self.last_accepted_ns = timestamp_ns;
        self.generation += 1;
        EventOutcome::Accepted
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn last_accepted_ns(&self) -> i64 {
        self.last_accepted_ns
    }

    /// Changes every time the timestamp log does
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Copy of the timestamp log
    pub fn timestamps(&self) -> Vec<i64> {
        self.timestamps.iter().copied().collect()
    }

    /// Drain the timestamp log, keeping counters and the debounce reference
    pub fn take_timestamps(&mut self) -> Vec<i64> {
        self.generation += 1;
        self.interval_cache = None;
        self.timestamps.drain(..).collect()
    }

    /// Zero every counter, clear the log and forget the debounce reference
    pub fn reset(&mut self) {
        self.received = 0;
        self.accepted = 0;
        self.rejected = 0;
        self.last_accepted_ns = 0;
        self.timestamps.clear();
        self.generation += 1;
        self.interval_cache = None;
    }

    /// Counters only, without the interval distribution
    pub fn counters(&self) -> EventStatistics {
        EventStatistics {
            received: self.received,
            accepted: self.accepted,
            rejected: self.rejected,
            count: self.timestamps.len(),
            intervals: None,
        }
    }

    /// Interval figures computed since the log last changed, if any
    pub fn cached_intervals(&self) -> Option<Option<IntervalStats>> {
        match self.interval_cache {
            Some((at, stats)) if at == self.generation => Some(stats),
            _ => None,
        }
    }

    /// Remember interval figures computed from the log at `generation`.
    ///
    /// Ignored when the log has changed since the snapshot was taken.
    pub fn cache_intervals(&mut self, generation: u64, stats: Option<IntervalStats>) {
        if generation == self.generation {
            self.interval_cache = Some((generation, stats));
        }
    }
}

/// Interval distribution of a timestamp log; `None` below two timestamps.
pub fn interval_stats(timestamps: &[i64]) -> Option<IntervalStats> {
    if timestamps.len() < 2 {
        return None;
    }

    let mut intervals: Vec<f64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64)
        .collect();
    let n = intervals.len() as f64;

    let mean = intervals.iter().sum::<f64>() / n;
    let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    intervals.sort_by(|a, b| a.total_cmp(b));
    let mid = intervals.len() / 2;
    let median = if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    };

    Some(IntervalStats {
        min: intervals[0],
        max: intervals[intervals.len() - 1],
        mean,
        median,
        std_dev: variance.sqrt(),
        samples: intervals.len(),
    })
}
