//! Wire-event logging and timing metrics.
//!
//! Thin wrappers over `tracing` so the dispatch loop and transport record
//! traffic and durations uniformly.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

/// Direction of a wire event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the server
    Incoming,
    /// Sent to the server
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// Record one wire event passing through the transport.
pub fn record_event(direction: Direction, kind: &str) {
    debug!(direction = %direction, event = kind, "ws event");
}

/// Record how long a labeled operation took.
pub fn record_duration(label: &str, duration: Duration) {
    info!(label, seconds = duration.as_secs_f64(), "runtime");
}
