//! Camera connection lifecycle
//!
//! The state machine is a pure function of (state, event, policy); the
//! worker feeds it events and sleeps out whatever backoff it returns.

use crate::error::FailureClass;
use drishti_core::RetryConfig;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Reconnect backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Persistent failures beyond this many in a row mark the camera fatal
    pub fatal_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            fatal_threshold: 10,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base: config.base(),
            cap: config.cap(),
            fatal_threshold: config.fatal_threshold,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures:
    /// `min(base * 2^(failures - 1), cap)`. Saturates instead of overflowing.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(failures - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Where a camera is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CameraState {
    Disconnected,
    Connecting {
        failures: u32,
    },
    Streaming,
    Retrying {
        failures: u32,
        #[serde(rename = "backoff_ms", serialize_with = "as_millis")]
        backoff: Duration,
    },
    FatalConfigError {
        failures: u32,
        #[serde(rename = "backoff_ms", serialize_with = "as_millis")]
        backoff: Duration,
    },
}

impl Default for CameraState {
    fn default() -> Self {
        CameraState::Disconnected
    }
}

impl CameraState {
    pub fn name(&self) -> &'static str {
        match self {
            CameraState::Disconnected => "disconnected",
            CameraState::Connecting { .. } => "connecting",
            CameraState::Streaming => "streaming",
            CameraState::Retrying { .. } => "retrying",
            CameraState::FatalConfigError { .. } => "fatal_config_error",
        }
    }

    /// Consecutive failures since the last successful connect
    pub fn failures(&self) -> u32 {
        match self {
            CameraState::Connecting { failures }
            | CameraState::Retrying { failures, .. }
            | CameraState::FatalConfigError { failures, .. } => *failures,
            CameraState::Disconnected | CameraState::Streaming => 0,
        }
    }

    /// Backoff the worker should wait out in this state
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            CameraState::Retrying { backoff, .. } | CameraState::FatalConfigError { backoff, .. } => {
                Some(*backoff)
            }
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, CameraState::Streaming)
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backoff() {
            Some(backoff) => write!(f, "{}({}ms)", self.name(), backoff.as_millis()),
            None => f.write_str(self.name()),
        }
    }
}

/// Input to the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraEvent {
    Start,
    /// Source opened and produced a decodable first frame
    Connected,
    ConnectFailed(FailureClass),
    ReadFailed(FailureClass),
    BackoffElapsed,
    Stop,
}

fn failed(failures: u32, class: FailureClass, policy: &RetryPolicy) -> CameraState {
    if failures > policy.fatal_threshold && class.is_persistent() {
        CameraState::FatalConfigError {
            failures,
            backoff: policy.cap,
        }
    } else {
        CameraState::Retrying {
            failures,
            backoff: policy.delay(failures),
        }
    }
}

/// Next state for `event`. Events that do not apply leave the state unchanged.
pub fn transition(state: &CameraState, event: CameraEvent, policy: &RetryPolicy) -> CameraState {
    use CameraEvent::*;
    use CameraState::*;

    match (*state, event) {
        (_, Stop) => Disconnected,
        (Disconnected, Start) => Connecting { failures: 0 },
        (Connecting { .. }, Connected) => Streaming,
        (Connecting { failures }, ConnectFailed(class) | ReadFailed(class)) => {
            failed(failures.saturating_add(1), class, policy)
        }
        (Streaming, ReadFailed(class)) => failed(1, class, policy),
        (Retrying { failures, .. } | FatalConfigError { failures, .. }, BackoffElapsed) => {
            Connecting { failures }
        }
        (current, _) => current,
    }
}
