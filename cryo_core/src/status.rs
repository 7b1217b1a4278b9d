//! Cycle status as reported to operators.

use std::time::{Duration, Instant};

use serde::Serialize;

pub const IDLE: &str = "Idle";
pub const STOPPED: &str = "Stopped";
pub const BETWEEN_SIDES: &str = "Sleeping between sides";

/// The step the cycle is in and when it began.
#[derive(Debug, Clone, PartialEq)]
pub struct StepState {
    pub label: String,
    pub started: Option<Instant>,
    /// `None` for steps with no timed dwell.
    pub nominal: Option<Duration>,
}

impl StepState {
    pub fn idle() -> Self {
        Self {
            label: IDLE.to_string(),
            started: None,
            nominal: None,
        }
    }
}

/// Point-in-time view of the cycle. Observability only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleStatus {
    pub running: bool,
    pub state: String,
    /// Device of the side being run, if any.
    pub side: Option<String>,
    /// Seconds spent in the current step.
    pub elapsed: f64,
    /// Nominal step length in seconds; 1 when the step has no dwell.
    pub total: f64,
    /// Last step attempted before the cycle stopped.
    pub last_step: Option<String>,
    pub last_error: Option<String>,
}
