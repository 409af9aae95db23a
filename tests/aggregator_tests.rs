//! Integration tests for the pulse aggregator
//!
//! These drive the real drain thread through the in-memory edge source.

use gridsense::aggregator::PulseAggregator;
use gridsense::config::{ChannelConfig, SourceConfig};
use gridsense::source::mock::MockEdgeSource;
use gridsense::source::{Bias, EdgeEventSource};
use gridsense::GridSenseError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const LINE: u32 = 26;
const PERIOD_NS: i64 = 8_333_333;
const BASE_NS: i64 = 1_000_000_000;

fn setup() -> (MockEdgeSource, PulseAggregator) {
    let source = MockEdgeSource::new();
    let aggregator = PulseAggregator::with_config(
        Box::new(source.clone()),
        &SourceConfig {
            wait_timeout_ms: 20,
            ..Default::default()
        },
    );
    (source, aggregator)
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn received(aggregator: &PulseAggregator, line: u32) -> u64 {
    aggregator
        .get_event_statistics(line, false)
        .map_or(0, |s| s.received)
}

fn train(start_ns: i64, count: usize) -> Vec<i64> {
    (0..count as i64).map(|k| start_ns + k * PERIOD_NS).collect()
}

// ============================================================================
// Debounce
// ============================================================================

#[test]
fn test_spaced_pulses_all_accepted() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();

    let pulses = train(BASE_NS, 500);
    assert_eq!(source.inject(LINE, &pulses), 500);
    assert!(wait_until(|| received(&aggregator, LINE) == 500));

    let stats = aggregator.get_event_statistics(LINE, false).unwrap();
    assert_eq!(stats.accepted, 500);
    assert_eq!(stats.rejected, 0);
    assert_eq!(aggregator.get_count(LINE), 500);
    assert_eq!(aggregator.get_timestamps(LINE), pulses);
}

#[test]
fn test_close_pair_rejects_exactly_one() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();

    // 0.15 ms apart with a 0.2 ms threshold
    source.inject(LINE, &[BASE_NS, BASE_NS + 150_000]);
    assert!(wait_until(|| received(&aggregator, LINE) == 2));

    let stats = aggregator.get_event_statistics(LINE, false).unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(aggregator.get_timestamps(LINE), vec![BASE_NS]);
}

#[test]
fn test_bounce_filtered_out_of_train() {
    let (source, aggregator) = setup();
    aggregator
        .register(LINE, ChannelConfig::with_debounce_ns(1_000_000))
        .unwrap();

    let clean = train(BASE_NS, 100);
    let mut noisy = Vec::new();
    for (i, &t) in clean.iter().enumerate() {
        noisy.push(t);
        if i % 4 == 0 {
            noisy.push(t + 300_000);
        }
    }
    source.inject(LINE, &noisy);
    assert!(wait_until(|| received(&aggregator, LINE) == noisy.len() as u64));

    assert_eq!(aggregator.get_timestamps(LINE), clean);
    let stats = aggregator.get_event_statistics(LINE, true).unwrap();
    assert_eq!(stats.rejected, 25);
    let intervals = stats.intervals.unwrap();
    assert_eq!(intervals.samples, 99);
    assert!((intervals.mean - PERIOD_NS as f64).abs() < 1.0);
    assert!(intervals.std_dev < 1.0);
}

// ============================================================================
// Reset and take
// ============================================================================

#[test]
fn test_reset_clears_counts_and_log() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();
    source.inject(LINE, &train(BASE_NS, 20));
    assert!(wait_until(|| aggregator.get_count(LINE) == 20));

    aggregator.reset(LINE).unwrap();
    let stats = aggregator.get_event_statistics(LINE, true).unwrap();
    assert_eq!(stats.count, 0);
    assert_eq!(stats.accepted, 0);
    assert_eq!(stats.received, 0);
    assert!(stats.intervals.is_none());
    assert!(aggregator.get_timestamps(LINE).is_empty());
}

#[test]
fn test_reset_is_atomic_for_readers() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();
    let aggregator = Arc::new(aggregator);
    let stop = Arc::new(AtomicBool::new(false));

    let reader = {
        let aggregator = Arc::clone(&aggregator);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut checks = 0_u64;
            while !stop.load(Ordering::Relaxed) {
                if let Some(stats) = aggregator.get_event_statistics(LINE, false) {
                    // No eviction or take here, so the log mirrors the accepted count
                    assert_eq!(stats.count as u64, stats.accepted);
                    assert!(stats.accepted <= stats.received);
                    checks += 1;
                }
            }
            checks
        })
    };

    let mut start = BASE_NS;
    for round in 0..50 {
        source.inject(LINE, &train(start, 20));
        start += 20 * PERIOD_NS;
        if round % 5 == 4 {
            aggregator.reset(LINE).unwrap();
        }
        thread::sleep(Duration::from_millis(1));
    }

    thread::sleep(Duration::from_millis(50));
    stop.store(true, Ordering::Relaxed);
    let checks = reader.join().unwrap();
    assert!(checks > 0);

    aggregator.reset(LINE).unwrap();
    assert_eq!(aggregator.get_count(LINE), 0);
    assert!(aggregator.get_timestamps(LINE).is_empty());
}

#[test]
fn test_take_timestamps_keeps_counters() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();
    let pulses = train(BASE_NS, 30);
    source.inject(LINE, &pulses);
    assert!(wait_until(|| aggregator.get_count(LINE) == 30));

    assert_eq!(aggregator.take_timestamps(LINE), pulses);
    assert!(aggregator.take_timestamps(LINE).is_empty());
    assert_eq!(aggregator.get_count(LINE), 30);
}

#[test]
fn test_interval_figures_track_drained_log() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();
    source.inject(LINE, &train(BASE_NS, 60));
    assert!(wait_until(|| aggregator.get_count(LINE) == 60));

    let before = aggregator.get_event_statistics(LINE, true).unwrap();
    assert_eq!(before.intervals.unwrap().samples, 59);

    assert_eq!(aggregator.take_timestamps(LINE).len(), 60);
    for _ in 0..3 {
        let stats = aggregator.get_event_statistics(LINE, true).unwrap();
        assert_eq!(stats.count, 0);
        assert!(stats.intervals.is_none());
        assert_eq!(stats.accepted, 60);
    }
}

#[test]
fn test_log_capacity_evicts_oldest() {
    let (source, aggregator) = setup();
    aggregator
        .register(LINE, ChannelConfig::with_capacity(100))
        .unwrap();
    let pulses = train(BASE_NS, 250);
    source.inject(LINE, &pulses);
    assert!(wait_until(|| aggregator.get_count(LINE) == 250));

    let log = aggregator.get_timestamps(LINE);
    assert_eq!(log.len(), 100);
    assert_eq!(log, pulses[150..].to_vec());
    assert!(log.windows(2).all(|w| w[1] >= w[0]));
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_capacity_is_two_channels() {
    let (source, aggregator) = setup();
    aggregator.register(26, ChannelConfig::default()).unwrap();
    aggregator.register(19, ChannelConfig::default()).unwrap();

    let err = aggregator.register(13, ChannelConfig::default()).unwrap_err();
    assert!(matches!(err, GridSenseError::MaxChannelsReached { max: 2 }));
    assert_eq!(aggregator.channels(), vec![19, 26]);
    assert_eq!(source.lines(), vec![26, 19]);
}

#[test]
fn test_register_is_idempotent() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();
    source.inject(LINE, &train(BASE_NS, 10));
    assert!(wait_until(|| aggregator.get_count(LINE) == 10));

    aggregator
        .register(LINE, ChannelConfig::with_debounce_ns(5_000_000))
        .unwrap();
    assert_eq!(source.requests_built(), 1);
    assert_eq!(aggregator.get_count(LINE), 10);
}

#[test]
fn test_second_channel_rebuilds_request() {
    let (source, aggregator) = setup();
    aggregator.register(26, ChannelConfig::default()).unwrap();
    let config = ChannelConfig {
        bias: Bias::Disabled,
        ..Default::default()
    };
    aggregator.register(19, config).unwrap();

    assert_eq!(source.requests_built(), 2);
    assert_eq!(source.bias_of(19), Some(Bias::Disabled));
    assert!(aggregator.is_running());

    source.inject(26, &train(BASE_NS, 5));
    source.inject(19, &train(BASE_NS + 1_000, 7));
    assert!(wait_until(|| aggregator.get_count(26) == 5 && aggregator.get_count(19) == 7));
}

#[test]
fn test_failed_reconfiguration_keeps_existing_channel() {
    let (source, aggregator) = setup();
    aggregator.register(26, ChannelConfig::default()).unwrap();
    source.fail_next_request();

    let err = aggregator.register(19, ChannelConfig::default()).unwrap_err();
    assert!(matches!(err, GridSenseError::Hardware(_)));
    assert_eq!(aggregator.channels(), vec![26]);
    assert!(aggregator.is_running());

    source.inject(26, &train(BASE_NS, 12));
    assert!(wait_until(|| aggregator.get_count(26) == 12));
}

// ============================================================================
// Error handling and shutdown
// ============================================================================

#[test]
fn test_transient_read_errors_are_retried() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();

    source.fail_reads(3);
    source.inject(LINE, &train(BASE_NS, 40));

    assert!(wait_until(|| aggregator.get_count(LINE) == 40));
    assert_eq!(aggregator.io_errors(), 3);
    assert!(aggregator.is_running());
}

#[test]
fn test_cleanup_stops_within_wait_timeout() {
    let (source, aggregator) = setup();
    aggregator.register(LINE, ChannelConfig::default()).unwrap();

    let started = Instant::now();
    aggregator.cleanup();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!aggregator.is_running());
    assert!(source.lines().is_empty());
    assert_eq!(aggregator.get_count(LINE), 0);
}
