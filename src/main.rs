use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use companion::config::CallConfig;
use companion::kernel::broadcast::BroadcastScript;
use companion::kernel::event::{Notice, StartCall};
use companion::kernel::history::{CallHistory, UsageTally};
use companion::services::loopback::{LoopbackDevices, LoopbackTransport, PacedSink};
use companion::study::{get_due_cards, FlashcardDeck};
use companion::{CallSessionManager, CallState, Collaborators, FinalState, SessionProfile};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CallConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => CallConfig::default(),
    };

    let history = Arc::new(CallHistory::default());
    let usage = Arc::new(UsageTally::new());
    let collaborators = Collaborators {
        media: Arc::new(LoopbackDevices),
        transport: Arc::new(LoopbackTransport::new()),
        speaker: Arc::new(PacedSink::new()),
        history: history.clone(),
        usage: Some(usage.clone()),
    };
    let (calls, actor) = CallSessionManager::spawn(config, SessionProfile::default(), collaborators);

    let mut notices = calls.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                Notice::Info(text) => tracing::info!("notice: {}", text),
                Notice::Error(text) => tracing::warn!("notice: {}", text),
                Notice::ToolCall(call) => tracing::info!("tool call: {}", call.name),
            }
        }
    });

    // Audio flashcard review: a scripted broadcast built from a fresh deck.
    let now = Utc::now();
    let deck = FlashcardDeck::generate(
        "Biology",
        "Cells",
        [("Mitochondria", "Produces ATP for the cell"), ("Ribosome", "Assembles proteins")],
        now,
    );
    let script = BroadcastScript::flashcard_review_script("Tutor", get_due_cards(&deck, now));
    tracing::info!("reviewing {} cards as a broadcast", deck.cards.len());
    calls.start_call(StartCall::broadcast(script)).await;
    let done = calls.wait_for(|s| s.state == CallState::Standby).await;
    tracing::info!("broadcast ended in {:?}", done.state);

    // A short live call against the echo transport.
    calls.start_call(StartCall::live().with_initial_text("Hello there")).await;
    calls.wait_for(|s| s.state == CallState::Connected).await;
    calls.send_text_to_live_session("How are you?").await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    tracing::info!("heard back: {:?}", calls.snapshot().live_output_transcription);
    calls.end_call(FinalState::Idle).await;

    for record in history.records() {
        tracing::info!("call {} lasted {}s", record.id, record.duration_seconds);
    }
    tracing::info!("usage reported: {}s", usage.seconds());

    calls.shutdown().await;
    actor.await.context("session actor panicked")?;
    Ok(())
}
