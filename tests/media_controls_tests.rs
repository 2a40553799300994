mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use companion::kernel::event::{Notice, StartCall};
use companion::{CallState, FinalState};
use support::{harness, settle, FakeDevices, FakeTransport};

async fn connected() -> support::Harness {
    let h = harness(FakeDevices::default(), FakeTransport::default());
    h.calls.start_call(StartCall::live()).await;
    h.calls.wait_for(|s| s.state == CallState::Connected).await;
    h
}

#[tokio::test(start_paused = true)]
async fn test_screen_share_start_is_idempotent() {
    let h = connected().await;
    let mut notices = h.calls.notices();

    h.calls.start_screen_share().await;
    h.calls.start_screen_share().await;
    let sharing = h.calls.wait_for(|s| s.is_screen_sharing).await;
    h.calls.start_screen_share().await;
    settle().await;

    assert!(sharing.resources.screen_stream);
    assert_eq!(h.devices.display_requests.load(Ordering::SeqCst), 1, "one display stream");
    assert_eq!(h.devices.display_tracks().iter().filter(|t| t.is_live()).count(), 1);
    assert_eq!(notices.recv().await.unwrap(), Notice::Info("Screen sharing started.".into()));
    assert!(notices.try_recv().is_err());

    // One capture loop at 5 fps: about five frames a second, not ten.
    let before = h.transport.media_with_mime("image/jpeg");
    tokio::time::sleep(Duration::from_secs(1)).await;
    let frames = h.transport.media_with_mime("image/jpeg") - before;
    assert!((4..=6).contains(&frames), "got {} frames", frames);
}

#[tokio::test(start_paused = true)]
async fn test_screen_share_stop_is_idempotent() {
    let h = connected().await;
    let mut notices = h.calls.notices();

    h.calls.start_screen_share().await;
    h.calls.wait_for(|s| s.is_screen_sharing).await;
    h.calls.stop_screen_share().await;
    h.calls.stop_screen_share().await;

    let snapshot = h.calls.snapshot();
    assert!(!snapshot.is_screen_sharing);
    assert!(!snapshot.resources.screen_stream);
    assert!(h.devices.display_tracks().iter().all(|t| !t.is_live()));
    assert_eq!(notices.recv().await.unwrap(), Notice::Info("Screen sharing started.".into()));
    assert_eq!(notices.recv().await.unwrap(), Notice::Info("Screen sharing stopped.".into()));
    assert!(notices.try_recv().is_err());

    let sent = h.transport.media_with_mime("image/jpeg");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.transport.media_with_mime("image/jpeg"), sent, "no frames after stop");
}

#[tokio::test(start_paused = true)]
async fn test_host_revoking_share_stops_it() {
    let h = connected().await;
    h.calls.start_screen_share().await;
    h.calls.wait_for(|s| s.is_screen_sharing).await;

    for track in h.devices.display_tracks() {
        track.stop();
    }
    let snapshot = h.calls.wait_for(|s| !s.is_screen_sharing).await;
    assert!(!snapshot.resources.screen_stream);
    assert_eq!(snapshot.state, CallState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_denied_screen_share_reports_notice() {
    let h = harness(FakeDevices::denying_display(), FakeTransport::default());
    h.calls.start_call(StartCall::live()).await;
    h.calls.wait_for(|s| s.state == CallState::Connected).await;
    let mut notices = h.calls.notices();

    h.calls.start_screen_share().await;
    assert_eq!(notices.recv().await.unwrap(), Notice::Info("Could not start screen sharing.".into()));
    assert!(!h.calls.snapshot().is_screen_sharing);

    // A later attempt asks the host again.
    h.calls.start_screen_share().await;
    settle().await;
    assert_eq!(h.devices.display_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_end_call_releases_screen_share() {
    let h = connected().await;
    h.calls.start_screen_share().await;
    h.calls.wait_for(|s| s.is_screen_sharing).await;

    h.calls.end_call(FinalState::Idle).await;
    let snapshot = h.calls.snapshot();
    assert!(!snapshot.is_screen_sharing);
    assert!(snapshot.resources.is_empty());
    assert!(h.devices.display_tracks().iter().all(|t| !t.is_live()));
}

#[tokio::test(start_paused = true)]
async fn test_screen_share_needs_a_call() {
    let h = harness(FakeDevices::default(), FakeTransport::default());
    h.calls.start_screen_share().await;
    settle().await;
    assert_eq!(h.devices.display_requests.load(Ordering::SeqCst), 0);
    assert!(h.calls.snapshot().resources.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mute_stops_transmission_and_speaking() {
    let h = connected().await;

    h.devices.speak(vec![0.5; 4096]).await;
    let speaking = h.calls.wait_for(|s| s.is_user_speaking).await;
    assert!(speaking.volume > 0.03);
    assert_eq!(h.transport.media_with_mime("audio/pcm;rate=16000"), 1);

    h.calls.toggle_mute().await;
    assert!(h.calls.snapshot().is_muted);
    h.devices.speak(vec![0.5; 4096]).await;
    settle().await;
    assert_eq!(h.transport.media_with_mime("audio/pcm"), 1, "muted audio is not sent");
    assert_eq!(h.calls.snapshot().volume, 0.0);

    h.calls.toggle_mute().await;
    h.devices.speak(vec![0.5; 4096]).await;
    settle().await;
    assert_eq!(h.transport.media_with_mime("audio/pcm"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_speaking_flag_clears_after_quiet_timeout() {
    let h = connected().await;

    h.devices.speak(vec![0.5; 4096]).await;
    h.calls.wait_for(|s| s.is_user_speaking).await;

    h.devices.speak(vec![0.0; 4096]).await;
    settle().await;
    assert!(h.calls.snapshot().is_user_speaking, "still within the timeout");

    tokio::time::sleep(Duration::from_millis(1600)).await;
    h.devices.speak(vec![0.0; 4096]).await;
    let quiet = h.calls.wait_for(|s| !s.is_user_speaking).await;
    assert_eq!(quiet.state, CallState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_output_volume_is_clamped() {
    let h = harness(FakeDevices::default(), FakeTransport::default());

    h.calls.set_output_volume(1.7).await;
    assert_eq!(h.calls.snapshot().output_volume, 1.0);
    h.calls.set_output_volume(-0.2).await;
    assert_eq!(h.calls.snapshot().output_volume, 0.0);
    h.calls.set_output_volume(0.4).await;
    assert_eq!(h.calls.snapshot().output_volume, 0.4);

    h.calls.toggle_speaker().await;
    let snapshot = h.calls.snapshot();
    assert!(!snapshot.is_speaker_on);
    assert_eq!(snapshot.output_volume, 0.4, "speaker off keeps the chosen volume");
}

#[tokio::test(start_paused = true)]
async fn test_device_preferences_survive_calls() {
    let h = connected().await;
    h.calls.toggle_mute().await;
    h.calls.set_output_volume(0.3).await;
    h.calls.end_call(FinalState::Idle).await;

    let snapshot = h.calls.snapshot();
    assert!(snapshot.is_muted);
    assert_eq!(snapshot.output_volume, 0.3);
}

#[tokio::test(start_paused = true)]
async fn test_camera_toggle_applies_to_next_call() {
    let h = connected().await;
    let mut notices = h.calls.notices();

    h.calls.toggle_camera().await;
    assert!(h.calls.snapshot().is_camera_on);
    assert!(matches!(notices.recv().await.unwrap(), Notice::Info(_)));
    assert_eq!(h.devices.tracks().len(), 1, "current call keeps its audio-only stream");

    h.calls.end_call(FinalState::Idle).await;
    h.calls.start_call(StartCall::live()).await;
    let snapshot = h.calls.wait_for(|s| s.state == CallState::Connected).await;
    assert!(snapshot.is_camera_enabled);
    assert_eq!(h.devices.tracks().len(), 3);
}
