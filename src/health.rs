//! Component health reporting
//!
//! The aggregator and the monitor report how well they are doing so the
//! application can surface a degraded sensor without stopping the pipeline.

use std::fmt;
use std::time::Instant;

/// Coarse health of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// Working normally
    Healthy,
    /// Working, but results may be unreliable
    Degraded,
    /// Not producing results
    Unhealthy,
    /// Not checked yet
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Healthy or degraded
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// The worse of two statuses
    pub fn worst(self, other: Self) -> Self {
        fn rank(status: HealthStatus) -> u8 {
            match status {
                HealthStatus::Healthy => 0,
                HealthStatus::Unknown => 1,
                HealthStatus::Degraded => 2,
                HealthStatus::Unhealthy => 3,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of one health check
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub component: String,
    pub status: HealthStatus,
    pub checked_at: Instant,
    pub message: String,
}

impl HealthCheck {
    pub fn new(component: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status,
            checked_at: Instant::now(),
            message: message.into(),
        }
    }

    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy, "OK")
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Degraded, message)
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Unhealthy, message)
    }

    /// Replace the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl fmt::Display for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.component, self.status, self.message)
    }
}

/// Components that can report their health
pub trait HealthCheckable {
    fn health_check(&self) -> HealthCheck;
}
