use drishti_eye::camera::{transition, CameraEvent, CameraState, RetryPolicy};
use drishti_eye::error::FailureClass;
use proptest::prelude::*;
use std::time::Duration;

fn run(events: &[CameraEvent], policy: &RetryPolicy) -> Vec<CameraState> {
    let mut state = CameraState::Disconnected;
    let mut trace = vec![state];
    for event in events {
        state = transition(&state, *event, policy);
        trace.push(state);
    }
    trace
}

#[test]
fn test_three_failures_then_success_trace() {
    let policy = RetryPolicy::default();
    let failed = CameraEvent::ConnectFailed(FailureClass::Transient);
    let trace = run(
        &[
            CameraEvent::Start,
            failed,
            CameraEvent::BackoffElapsed,
            failed,
            CameraEvent::BackoffElapsed,
            failed,
            CameraEvent::BackoffElapsed,
            CameraEvent::Connected,
        ],
        &policy,
    );

    let secs = Duration::from_secs;
    assert_eq!(
        trace,
        vec![
            CameraState::Disconnected,
            CameraState::Connecting { failures: 0 },
            CameraState::Retrying { failures: 1, backoff: secs(1) },
            CameraState::Connecting { failures: 1 },
            CameraState::Retrying { failures: 2, backoff: secs(2) },
            CameraState::Connecting { failures: 2 },
            CameraState::Retrying { failures: 3, backoff: secs(4) },
            CameraState::Connecting { failures: 3 },
            CameraState::Streaming,
        ]
    );
}

#[test]
fn test_success_resets_failures() {
    let policy = RetryPolicy::default();
    let trace = run(
        &[
            CameraEvent::Start,
            CameraEvent::ConnectFailed(FailureClass::Transient),
            CameraEvent::BackoffElapsed,
            CameraEvent::Connected,
            CameraEvent::ReadFailed(FailureClass::Transient),
        ],
        &policy,
    );
    assert_eq!(
        trace.last(),
        Some(&CameraState::Retrying {
            failures: 1,
            backoff: Duration::from_secs(1)
        })
    );
}

#[test]
fn test_decode_errors_follow_reconnect_path() {
    let policy = RetryPolicy::default();
    let next = transition(
        &CameraState::Connecting { failures: 4 },
        CameraEvent::ReadFailed(FailureClass::Decode),
        &policy,
    );
    assert_eq!(
        next,
        CameraState::Retrying {
            failures: 5,
            backoff: Duration::from_secs(16)
        }
    );
}

#[test]
fn test_fatal_threshold_is_configurable() {
    for threshold in [0u32, 3, 10] {
        let policy = RetryPolicy {
            fatal_threshold: threshold,
            ..RetryPolicy::default()
        };
        let mut state = CameraState::Disconnected;
        state = transition(&state, CameraEvent::Start, &policy);
        let mut failures = 0;
        while !matches!(state, CameraState::FatalConfigError { .. }) {
            state = transition(&state, CameraEvent::ConnectFailed(FailureClass::Config), &policy);
            failures += 1;
            state = match state {
                CameraState::FatalConfigError { .. } => state,
                _ => transition(&state, CameraEvent::BackoffElapsed, &policy),
            };
            assert!(failures <= threshold + 1);
        }
        assert_eq!(failures, threshold + 1);
        assert_eq!(state.backoff(), Some(policy.cap));
    }
}

proptest! {
    #[test]
    fn prop_delay_matches_formula(k in 1u32..64, base_ms in 1u64..5_000, cap_factor in 1u64..100) {
        let policy = RetryPolicy {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(base_ms * cap_factor),
            fatal_threshold: 10,
        };
        let expected = if k - 1 >= 32 {
            policy.cap
        } else {
            Duration::from_millis(base_ms.saturating_mul(1u64 << (k - 1))).min(policy.cap)
        };
        prop_assert_eq!(policy.delay(k), expected);
    }

    #[test]
    fn prop_delay_non_decreasing_until_capped(k in 1u32..200) {
        let policy = RetryPolicy::default();
        let current = policy.delay(k);
        let next = policy.delay(k + 1);
        prop_assert!(next >= current);
        prop_assert!(next <= policy.cap);
    }

    #[test]
    fn prop_stop_always_disconnects(events in proptest::collection::vec(0u8..6, 0..40)) {
        let policy = RetryPolicy::default();
        let mut state = CameraState::Disconnected;
        for code in events {
            let event = match code {
                0 => CameraEvent::Start,
                1 => CameraEvent::Connected,
                2 => CameraEvent::ConnectFailed(FailureClass::Transient),
                3 => CameraEvent::ReadFailed(FailureClass::Auth),
                4 => CameraEvent::BackoffElapsed,
                _ => CameraEvent::Stop,
            };
            state = transition(&state, event, &policy);
            if let Some(backoff) = state.backoff() {
                prop_assert!(backoff <= policy.cap);
            }
        }
        prop_assert_eq!(transition(&state, CameraEvent::Stop, &policy), CameraState::Disconnected);
    }
}
