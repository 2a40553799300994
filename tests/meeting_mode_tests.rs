mod support;

use std::sync::{Arc, Mutex};

use companion::kernel::event::{FinalTranscript, ServerEvent, Sentiment, StartCall};
use companion::kernel::state::SessionMode;
use companion::transport::TransportEvent;
use companion::{CallState, FinalState};
use support::{harness, FakeDevices, FakeTransport};

fn said(event: ServerEvent) -> TransportEvent {
    TransportEvent::Message(event)
}

#[tokio::test(start_paused = true)]
async fn test_start_meeting_opens_transcribing_session() {
    let h = harness(FakeDevices::default(), FakeTransport::default());

    h.calls.start_meeting("Spanish", true).await;
    assert_eq!(h.calls.snapshot().mode, SessionMode::Meeting);
    h.calls.wait_for(|s| s.state == CallState::Connected).await;

    let request = h.transport.requests().pop().unwrap();
    assert_eq!(request.mode, SessionMode::Meeting);
    assert!(request.transcription);
    assert_eq!(
        request.instruction_override.as_deref(),
        Some(
            "You are in Meeting Mode. The primary language is Spanish. Provide live English interpretation. \
             Your task is to transcribe the conversation accurately."
        )
    );

    h.calls.end_call(FinalState::Idle).await;
    assert_eq!(h.calls.snapshot().mode, SessionMode::Default, "meeting mode only lasts one call");
}

#[tokio::test(start_paused = true)]
async fn test_meeting_transcript_handed_to_callback() {
    let h = harness(FakeDevices::default(), FakeTransport::default());
    let received: Arc<Mutex<Vec<FinalTranscript>>> = Arc::default();
    let sink = received.clone();
    h.calls.set_on_call_end(move |transcript| sink.lock().unwrap().push(transcript)).await;
    h.calls.set_speaker_name("speaker_1", "Ana").await;

    h.calls.start_meeting("Spanish", false).await;
    h.calls.wait_for(|s| s.state == CallState::Connected).await;

    h.transport.emit(said(ServerEvent::SpeakerDetected { speaker: "speaker_1".into() }));
    h.transport.emit(said(ServerEvent::InputTranscription { text: "Hola a todos. ".into() }));
    h.transport.emit(said(ServerEvent::OutputTranscription { text: "Hello everyone. ".into() }));
    h.transport.emit(said(ServerEvent::Sentiment(Sentiment::Positive)));
    let live = h.calls.wait_for(|s| s.sentiment.is_some()).await;
    assert!(live.detected_speakers.contains("speaker_1"));
    assert_eq!(live.polished_original_transcript, "Hola a todos. ");

    h.calls.end_call(FinalState::Idle).await;
    h.calls.end_call(FinalState::Idle).await;

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1, "callback runs once per call");
    assert_eq!(received[0].original, "Hola a todos. ");
    assert_eq!(received[0].interpretation, "Hello everyone. ");
    assert_eq!(received[0].speaker_names.get("speaker_1").map(String::as_str), Some("Ana"));

    let snapshot = h.calls.snapshot();
    assert!(snapshot.polished_original_transcript.is_empty());
    assert!(snapshot.sentiment.is_none());
    assert!(snapshot.detected_speakers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_callback_skipped_outside_meeting_mode() {
    let h = harness(FakeDevices::default(), FakeTransport::default());
    let calls: Arc<Mutex<u32>> = Arc::default();
    let counter = calls.clone();
    h.calls.set_on_call_end(move |_| *counter.lock().unwrap() += 1).await;

    h.calls.start_call(StartCall::live().with_mode(SessionMode::Study)).await;
    h.calls.wait_for(|s| s.state == CallState::Connected).await;
    h.transport.emit(said(ServerEvent::InputTranscription { text: "what is osmosis".into() }));
    let snapshot = h.calls.wait_for(|s| !s.live_input_transcription.is_empty()).await;
    assert!(snapshot.polished_original_transcript.is_empty());
    h.calls.end_call(FinalState::Idle).await;

    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_set_mode_applies_to_next_call() {
    let h = harness(FakeDevices::default(), FakeTransport::default());
    h.calls.set_mode(SessionMode::Quiz).await;
    assert_eq!(h.calls.snapshot().mode, SessionMode::Quiz);

    h.calls.start_call(StartCall::live()).await;
    h.calls.set_mode(SessionMode::News).await;
    assert_eq!(h.calls.snapshot().mode, SessionMode::Quiz);
    h.calls.wait_for(|s| s.state == CallState::Connected).await;
    assert_eq!(h.transport.requests()[0].mode, SessionMode::Quiz);

    h.calls.end_call(FinalState::Idle).await;
    assert_eq!(h.calls.snapshot().mode, SessionMode::News);
}

#[tokio::test(start_paused = true)]
async fn test_turn_complete_clears_live_transcription() {
    let h = harness(FakeDevices::default(), FakeTransport::default());
    h.calls.start_call(StartCall::live().with_context("earlier chat")).await;
    h.calls.wait_for(|s| s.state == CallState::Connected).await;
    assert_eq!(h.transport.requests()[0].conversation_context.as_deref(), Some("earlier chat"));

    h.transport.emit(said(ServerEvent::OutputTranscription { text: "Sure thing".into() }));
    h.calls.wait_for(|s| s.live_output_transcription == "Sure thing").await;
    h.transport.emit(said(ServerEvent::TurnComplete));
    let snapshot = h.calls.wait_for(|s| s.live_output_transcription.is_empty()).await;
    assert_eq!(snapshot.state, CallState::Connected);
}
