// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! In-memory edge source
//!
//! Behaves like a kernel line request: only requested lines deliver events,
//! `wait` blocks until something is queued, and events carry the timestamp
//! they were injected with rather than the time they are read. Clones share
//! the same queue, so a test can keep a handle while the aggregator owns
//! another.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{Bias, ChannelId, EdgeEvent, EdgeEventSource};
use crate::error::{GridSenseError, Result};

#[derive(Debug, Default)]
struct MockState {
    lines: Vec<(ChannelId, Bias)>,
    queue: VecDeque<EdgeEvent>,
    unavailable: bool,
    fail_next_request: bool,
    failing_reads: usize,
    requests_built: usize,
}

#[derive(Debug, Default)]
struct MockShared {
    state: Mutex<MockState>,
    ready: Condvar,
}

/// Injectable edge source for tests and simulator mode
#[derive(Debug, Clone, Default)]
pub struct MockEdgeSource {
    shared: Arc<MockShared>,
}

impl MockEdgeSource {
    /// Create an available source with no lines
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that behaves like a missing GPIO device
    pub fn unavailable() -> Self {
        let source = Self::default();
        source.shared.state.lock().unavailable = true;
        source
    }

    /// Queue rising edges on `channel_id`.
    ///
    /// Returns how many were queued; nothing is delivered for lines that are
    /// not currently requested.
    pub fn inject(&self, channel_id: ChannelId, timestamps: &[i64]) -> usize {
        let events: Vec<_> = timestamps
            .iter()
            .map(|&t| EdgeEvent::rising(channel_id, t))
            .collect();
        self.inject_events(&events)
    }

    /// Queue arbitrary events, filtered by requested lines
    pub fn inject_events(&self, events: &[EdgeEvent]) -> usize {
        let mut state = self.shared.state.lock();
        let mut queued = 0;
        for event in events {
            if state.lines.iter().any(|(id, _)| *id == event.channel_id) {
                state.queue.push_back(*event);
                queued += 1;
            }
        }
        drop(state);
        if queued > 0 {
            self.shared.ready.notify_all();
        }
        queued
    }

    /// Make the next `register` fail as if the kernel refused the request
    pub fn fail_next_request(&self) {
        self.shared.state.lock().fail_next_request = true;
    }

    /// Make the next read fail with a transient I/O error
    pub fn fail_next_read(&self) {
        self.fail_reads(1);
    }

    /// Make the next `count` reads fail with a transient I/O error
    pub fn fail_reads(&self, count: usize) {
        self.shared.state.lock().failing_reads = count;
        self.shared.ready.notify_all();
    }

    /// Events waiting to be drained
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of line requests built so far (one per successful register)
    pub fn requests_built(&self) -> usize {
        self.shared.state.lock().requests_built
    }

    /// Bias requested for a line, if it is requested
    pub fn bias_of(&self, channel_id: ChannelId) -> Option<Bias> {
        self.shared
            .state
            .lock()
            .lines
            .iter()
            .find(|(id, _)| *id == channel_id)
            .map(|(_, bias)| *bias)
    }
}

impl EdgeEventSource for MockEdgeSource {
    fn register(&mut self, channel_id: ChannelId, bias: Bias) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.unavailable {
            return Err(GridSenseError::unavailable("mock GPIO chip absent"));
        }
        if state.fail_next_request {
            state.fail_next_request = false;
            return Err(GridSenseError::Hardware(format!(
                "request for line {} refused",
                channel_id
            )));
        }
        if !state.lines.iter().any(|(id, _)| *id == channel_id) {
            state.lines.push((channel_id, bias));
        }
        // A rebuilt request starts with an empty kernel queue
        state.queue.clear();
        state.requests_built += 1;
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let mut state = self.shared.state.lock();
        if state.queue.is_empty() && state.failing_reads == 0 {
            self.shared.ready.wait_for(&mut state, timeout);
        }
        Ok(!state.queue.is_empty() || state.failing_reads > 0)
    }

    fn read(&mut self) -> Result<Vec<EdgeEvent>> {
        let mut state = self.shared.state.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(GridSenseError::Io(io::Error::new(
                io::ErrorKind::Interrupted,
                "injected read failure",
            )));
        }
        Ok(state.queue.drain(..).collect())
    }

    fn release(&mut self) {
        let mut state = self.shared.state.lock();
        state.lines.clear();
        state.queue.clear();
    }

    fn lines(&self) -> Vec<ChannelId> {
        self.shared
            .state
            .lock()
            .lines
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    fn is_available(&self) -> bool {
        !self.shared.state.lock().unavailable
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_inject_requires_requested_line() {
        let mut source = MockEdgeSource::new();
        assert_eq!(source.inject(26, &[1, 2, 3]), 0);

        source.register(26, Bias::PullUp).unwrap();
        assert_eq!(source.inject(26, &[1, 2, 3]), 3);
        assert_eq!(source.inject(19, &[4]), 0);
        assert_eq!(source.pending(), 3);
    }

    #[test]
    fn test_read_drains_in_order() {
        let mut source = MockEdgeSource::new();
        source.register(26, Bias::Disabled).unwrap();
        source.inject(26, &[10, 20, 30]);

        assert!(source.wait(Duration::from_millis(1)).unwrap());
        let events = source.read().unwrap();
        let stamps: Vec<_> = events.iter().map(|e| e.timestamp_ns).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
        assert!(source.read().unwrap().is_empty());
        assert_eq!(source.bias_of(26), Some(Bias::Disabled));
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let mut source = MockEdgeSource::new();
        source.register(26, Bias::PullUp).unwrap();

        let start = Instant::now();
        assert!(!source.wait(Duration::from_millis(20)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_wait_wakes_on_inject_from_other_handle() {
        let mut source = MockEdgeSource::new();
        source.register(26, Bias::PullUp).unwrap();
        let handle = source.clone();

        let injector = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handle.inject(26, &[42]);
        });

        assert!(source.wait(Duration::from_secs(5)).unwrap());
        injector.join().unwrap();
        assert_eq!(source.read().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_request_keeps_previous_lines() {
        let mut source = MockEdgeSource::new();
        source.register(26, Bias::PullUp).unwrap();
        source.fail_next_request();

        let err = source.register(19, Bias::PullUp).unwrap_err();
        assert!(matches!(err, GridSenseError::Hardware(_)));
        assert_eq!(source.lines(), vec![26]);
        assert_eq!(source.requests_built(), 1);
    }

    #[test]
    fn test_unavailable_source() {
        let mut source = MockEdgeSource::unavailable();
        assert!(!source.is_available());
        assert!(source.register(26, Bias::PullUp).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_injected_read_failure() {
        let mut source = MockEdgeSource::new();
        source.register(26, Bias::PullUp).unwrap();
        source.fail_next_read();

        assert!(source.wait(Duration::from_millis(1)).unwrap());
        assert!(matches!(source.read(), Err(GridSenseError::Io(_))));
        assert!(source.read().unwrap().is_empty());
    }
}
