// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Simulated site: grid, outage, hunting generator, grid again
//!
//! Replays a scripted pulse train through the in-memory edge source and the
//! full pipeline, printing one line per second and every state change.
//!
//! ```text
//! cargo run --example simulated_site
//! RUST_LOG=gridsense=debug cargo run --example simulated_site -- 42
//! ```

use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gridsense::aggregator::PulseAggregator;
use gridsense::source::mock::MockEdgeSource;
use gridsense::{
    HandlerError, HealthCheckable, MonitorConfig, PowerMonitor, PulseCounter, SourceConfig,
    Transition,
};
use gridsense_sim::patterns::split_ticks;
use gridsense_sim::SiteScript;
use tracing_subscriber::EnvFilter;

const START_NS: i64 = 1_000_000_000;
const TICK_NS: i64 = 500_000_000;

fn main() -> Result<(), Box<dyn Error>> {
    // Library records go through `log`; the fmt subscriber picks them up
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let seed = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(7);
    let script = SiteScript::standard_cycle(seed);
    let train = script.render(START_NS)?;
    let ticks = (script.total_duration_secs() * 1e9 / TICK_NS as f64) as usize;

    let config = MonitorConfig::default();
    let source = MockEdgeSource::new();
    let counter: Arc<dyn PulseCounter> = Arc::new(PulseAggregator::with_config(
        Box::new(source.clone()),
        &SourceConfig {
            wait_timeout_ms: 20,
            ..config.source.clone()
        },
    ));

    let start = Instant::now();
    let mut monitor = PowerMonitor::with_start(&config, Arc::clone(&counter), start)?;
    for state in gridsense::PowerState::ALL {
        monitor
            .state_machine_mut()
            .on_enter(state, |t: &Transition| -> Result<(), HandlerError> {
                println!("  >> {} -> {} ({:?})", t.from, t.to, t.reason);
                Ok(())
            });
    }

    println!(
        "Replaying {:.0} s of pulses ({} edges, seed {})",
        script.total_duration_secs(),
        train.len(),
        seed
    );

    let mut injected = 0_u64;
    for (i, window) in split_ticks(&train, START_NS, TICK_NS, ticks).iter().enumerate() {
        source.inject(config.channel_id, window);
        injected += window.len() as u64;
        wait_for_drain(counter.as_ref(), config.channel_id, injected);

        let elapsed = Duration::from_nanos(TICK_NS as u64 * (i as u64 + 1));
        let report = monitor.tick_at(start + elapsed);

        if (i + 1) % 2 == 0 {
            let supply = script
                .supply_at(elapsed.as_secs_f64() - 0.25)
                .map_or_else(|| "-".to_string(), |s| format!("{:?}", s));
            let frequency = report
                .frequency
                .map_or_else(|| "   --   ".to_string(), |f| format!("{:8.4}", f));
            println!(
                "t={:5.1}s  supply={:<9} f={} Hz  {:<10} state={}",
                elapsed.as_secs_f64(),
                supply,
                frequency,
                report.classification.to_string(),
                report.state
            );
        }
    }

    println!("{}", monitor.health_check());
    println!("{}", counter.health_check());
    Ok(())
}

/// Give the drain thread time to count what was injected
fn wait_for_drain(counter: &dyn PulseCounter, channel: u32, expected: u64) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        let received = counter
            .get_event_statistics(channel, false)
            .map_or(0, |s| s.received);
        if received >= expected {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
