// GridSense - AC power source classification
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Linux GPIO character-device edge source (uAPI v2)

use std::fs::OpenOptions;
use std::io;
use std::time::Duration;

use gpiocdev::line::{self, EdgeDetection, EdgeKind};
use gpiocdev::Request;
use log::{debug, info};

use super::{Bias, ChannelId, EdgeDirection, EdgeEvent, EdgeEventSource};
use crate::config::SourceConfig;
use crate::error::{GridSenseError, Result};

/// Edge source backed by one kernel line request covering every registered line
pub struct GpioChipSource {
    config: SourceConfig,
    lines: Vec<(ChannelId, Bias)>,
    request: Option<Request>,
}

impl GpioChipSource {
    /// Open the chip named in `config`.
    ///
    /// A missing device node or missing permissions is reported as
    /// `HardwareUnavailable` so the caller can fall back to a disabled counter.
    pub fn open(config: SourceConfig) -> Result<Self> {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.chip_path)
        {
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                ) =>
            {
                return Err(GridSenseError::unavailable(format!(
                    "{}: {}",
                    config.chip_path, e
                )));
            }
            Err(e) => return Err(GridSenseError::Io(e)),
        }

        info!("GPIO chip {} opened", config.chip_path);
        Ok(Self {
            config,
            lines: Vec::new(),
            request: None,
        })
    }

    fn build_request(&self, lines: &[(ChannelId, Bias)]) -> Result<Request> {
        let mut builder = Request::builder();
        builder
            .on_chip(&self.config.chip_path)
            .with_consumer(&self.config.consumer);
        // Rising edges only: the optocoupler produces one clean rising edge per crossing
        for (offset, bias) in lines {
            builder
                .with_line(*offset)
                .as_input()
                .with_edge_detection(EdgeDetection::RisingEdge)
                .with_bias(line_bias(*bias));
        }
        builder
            .request()
            .map_err(|e| GridSenseError::Hardware(e.to_string()))
    }
}

fn line_bias(bias: Bias) -> line::Bias {
    match bias {
        Bias::PullUp => line::Bias::PullUp,
        Bias::PullDown => line::Bias::PullDown,
        Bias::Disabled => line::Bias::Disabled,
    }
}

fn io_error(e: gpiocdev::Error) -> GridSenseError {
    GridSenseError::Io(io::Error::new(io::ErrorKind::Other, e.to_string()))
}

impl EdgeEventSource for GpioChipSource {
    fn register(&mut self, channel_id: ChannelId, bias: Bias) -> Result<()> {
        let mut lines = self.lines.clone();
        if !lines.iter().any(|(id, _)| *id == channel_id) {
            lines.push((channel_id, bias));
        }

        // The kernel request cannot be amended: release it and request every line again
        let previous = self.request.take();
        drop(previous);

        match self.build_request(&lines) {
            Ok(request) => {
                self.request = Some(request);
                self.lines = lines;
                debug!(
                    "Line request rebuilt on {} for {:?}",
                    self.config.chip_path, self.lines
                );
                Ok(())
            }
            Err(e) => {
                // Bring the old lines back if we can
                if !self.lines.is_empty() {
                    self.request = self.build_request(&self.lines).ok();
                }
                Err(e)
            }
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        match &self.request {
            Some(request) => request.wait_edge_event(timeout).map_err(io_error),
            None => {
                std::thread::sleep(timeout);
                Ok(false)
            }
        }
    }

    fn read(&mut self) -> Result<Vec<EdgeEvent>> {
        let request = match &self.request {
            Some(request) => request,
            None => return Ok(Vec::new()),
        };

        let mut events = Vec::new();
        while request.has_edge_event().map_err(io_error)? {
            let event = request.read_edge_event().map_err(io_error)?;
            events.push(EdgeEvent {
                channel_id: event.offset,
                timestamp_ns: event.timestamp_ns as i64,
                direction: match event.kind {
                    EdgeKind::Rising => EdgeDirection::Rising,
                    EdgeKind::Falling => EdgeDirection::Falling,
                },
            });
        }
        Ok(events)
    }

    fn release(&mut self) {
        if self.request.take().is_some() {
            info!("GPIO lines released on {}", self.config.chip_path);
        }
        self.lines.clear();
    }

    fn lines(&self) -> Vec<ChannelId> {
        self.lines.iter().map(|(id, _)| *id).collect()
    }

    fn name(&self) -> &str {
        &self.config.chip_path
    }
}
