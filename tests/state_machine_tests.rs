use std::time::Duration;

use companion::kernel::cancel::{CallEpoch, CancellationRegistry};
use companion::kernel::state::{CallGraph, CallRequest, CallSnapshot, CallState, FinalState};
use companion::kernel::time::DurationClock;

#[test]
fn test_happy_path_transitions() {
    let mut current = CallState::default();
    assert_eq!(current, CallState::Idle);
    assert_eq!(CallSnapshot::default().state, CallState::Idle);
    for (request, expected) in [
        (CallRequest::Start, CallState::Ringing),
        (CallRequest::RingElapsed, CallState::Connecting),
        (CallRequest::Established, CallState::Connected),
        (CallRequest::Pause, CallState::Paused),
        (CallRequest::Resume, CallState::Connected),
        (CallRequest::End, CallState::Disconnecting),
        (CallRequest::TeardownComplete(FinalState::Standby), CallState::Standby),
        (CallRequest::Start, CallState::Ringing),
    ] {
        current = CallGraph::transition(current, request)
            .unwrap_or_else(|| panic!("{:?} rejected from {:?}", request, current));
        assert_eq!(current, expected);
    }
}

#[test]
fn test_invalid_requests_are_rejected() {
    use CallRequest::*;
    let rejected = [
        (CallState::Idle, End),
        (CallState::Standby, End),
        (CallState::Idle, Pause),
        (CallState::Connected, Resume),
        (CallState::Paused, Pause),
        (CallState::Ringing, Start),
        (CallState::Connected, Start),
        (CallState::Ringing, Established),
        (CallState::Ringing, AcquisitionFailed),
        (CallState::Disconnecting, End),
        (CallState::Idle, TeardownComplete(FinalState::Idle)),
    ];
    for (state, request) in rejected {
        assert!(CallGraph::transition(state, request).is_none(), "{:?} accepted from {:?}", request, state);
    }
}

#[test]
fn test_every_active_state_can_end() {
    for state in [CallState::Ringing, CallState::Connecting, CallState::Connected, CallState::Paused] {
        assert!(state.is_active());
        assert_eq!(CallGraph::transition(state, CallRequest::End), Some(CallState::Disconnecting));
    }
    for state in [CallState::Connecting, CallState::Connected, CallState::Paused] {
        assert!(state.holds_transport());
        assert_eq!(CallGraph::transition(state, CallRequest::TransportFailed), Some(CallState::Disconnecting));
    }
}

#[test]
fn test_reset_session_keeps_device_preferences() {
    let mut snapshot = CallSnapshot::new(0.6, true);
    snapshot.is_muted = true;
    snapshot.duration_seconds = 42;
    snapshot.live_output_transcription.push_str("hello");
    snapshot.volume = 0.4;

    snapshot.reset_session();
    assert_eq!(snapshot.duration_seconds, 0);
    assert!(snapshot.live_output_transcription.is_empty());
    assert_eq!(snapshot.volume, 0.0);
    assert!(snapshot.is_muted && snapshot.is_speaker_on && snapshot.is_camera_on);
    assert_eq!(snapshot.output_volume, 0.6);
}

#[test]
fn test_registry_invalidates_previous_epoch() {
    let mut registry = CancellationRegistry::new();
    let first = registry.begin();
    let child = first.child();
    assert!(registry.is_current(first.epoch));

    let second = registry.begin();
    assert!(first.is_cancelled() && child.is_cancelled());
    assert!(!registry.is_current(first.epoch));
    assert!(registry.is_current(second.epoch));
    assert_eq!(second.epoch, CallEpoch(2));

    registry.cancel_current();
    assert!(second.is_cancelled());
    assert!(!registry.is_current(second.epoch));
}

#[tokio::test(start_paused = true)]
async fn test_duration_clock_skips_paused_spans() {
    let mut clock = DurationClock::new();
    clock.start();
    tokio::time::advance(Duration::from_secs(4)).await;
    clock.pause();
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(clock.whole_seconds(), 4);
    clock.start();
    tokio::time::advance(Duration::from_millis(2500)).await;

    assert_eq!(clock.take(), Duration::from_millis(6500));
    assert_eq!(clock.elapsed(), Duration::ZERO);
    assert!(!clock.is_running());
}
