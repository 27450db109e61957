//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.

use std::fmt;

/// Process lifecycle state.
///
/// Transitions are one-directional: `Running -> Draining -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Accepting and serving requests
    Running = 0,
    /// No new connections; in-flight requests finishing
    Draining = 1,
    /// Store released; process about to exit
    Closed = 2,
}

impl LifecycleState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a state stored in an atomic. Unknown values are treated as `Closed`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a registered metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Monotonically non-decreasing integer
    Counter,
    /// Point-in-time value, set by the process collector
    Gauge,
    /// Bucketed observations with a running sum
    Histogram,
}

impl MetricKind {
    /// Name used in the `# TYPE` exposition line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
