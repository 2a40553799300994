//! Scripted playback: an ordered list of segments played one after another
//! through the shared output chain, advancing only when the current segment
//! has finished or turned out to be undecodable.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::codec::{decode, decode_audio_data, AudioBuffer};
use crate::services::tts::SpeechSynthesizer;
use crate::study::FlashcardRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub speaker_id: String,
    pub text: String,
    /// Base64 PCM16 at the output sample rate. Absent means a short pause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl Segment {
    pub fn new(speaker_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { speaker_id: speaker_id.into(), text: text.into(), audio: None }
    }

    pub fn with_audio(mut self, audio: impl Into<String>) -> Self {
        self.audio = Some(audio.into());
        self
    }

    fn has_audio(&self) -> bool {
        self.audio.as_deref().map(|a| !a.trim().is_empty()).unwrap_or(false)
    }
}

/// What the session should do next with the output chain.
#[derive(Debug)]
pub enum SegmentAction {
    Play { cursor: usize, speaker_id: String, buffer: AudioBuffer },
    /// The script is exhausted. Returned once per loaded script.
    Finished,
    Idle,
}

#[derive(Debug, Default)]
pub struct BroadcastPlayer {
    script: Vec<Segment>,
    cursor: usize,
    active: bool,
    finished: bool,
}

impl BroadcastPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and stays inactive) for an empty script.
    pub fn load(&mut self, script: Vec<Segment>) -> bool {
        self.active = !script.is_empty();
        self.script = script;
        self.cursor = 0;
        self.finished = false;
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.script.clear();
        self.cursor = 0;
    }

    /// Marks the segment at `cursor` as done. Completions for any other
    /// segment are ignored, so a late callback can never skip ahead.
    pub fn segment_finished(&mut self, cursor: usize) -> bool {
        if !self.active || cursor != self.cursor {
            return false;
        }
        self.cursor += 1;
        true
    }

    /// Decodes the segment under the cursor. Undecodable segments are
    /// skipped.
    pub fn next_action(&mut self, sample_rate: u32, channels: u16, silence: Duration) -> SegmentAction {
        if !self.active {
            return SegmentAction::Idle;
        }
        while let Some(segment) = self.script.get(self.cursor) {
            if !segment.has_audio() {
                let frames = (silence.as_secs_f64() * f64::from(sample_rate)) as usize;
                return SegmentAction::Play {
                    cursor: self.cursor,
                    speaker_id: segment.speaker_id.clone(),
                    buffer: AudioBuffer::silence(sample_rate, frames),
                };
            }
            let payload = segment.audio.as_deref().unwrap_or_default();
            match decode(payload).and_then(|bytes| decode_audio_data(&bytes, sample_rate, channels)) {
                Ok(buffer) => {
                    return SegmentAction::Play {
                        cursor: self.cursor,
                        speaker_id: segment.speaker_id.clone(),
                        buffer,
                    };
                }
                Err(e) => {
                    warn!("skipping broadcast segment {}: {}", self.cursor, e);
                    self.cursor += 1;
                }
            }
        }

        self.active = false;
        if self.finished {
            return SegmentAction::Idle;
        }
        self.finished = true;
        debug!("broadcast script exhausted after {} segments", self.script.len());
        SegmentAction::Finished
    }
}

/// Builders for locally constructed scripts.
pub struct BroadcastScript;

impl BroadcastScript {
    /// Synthesizes audio for every segment that has none. A failed synthesis
    /// leaves the segment silent.
    pub async fn synthesize_missing<V>(
        script: Vec<Segment>,
        synthesizer: &dyn SpeechSynthesizer,
        voice_for: V,
    ) -> Vec<Segment>
    where
        V: Fn(&str) -> String,
    {
        let mut out = Vec::with_capacity(script.len());
        for mut segment in script {
            if !segment.has_audio() {
                let voice = voice_for(&segment.speaker_id);
                match synthesizer.synthesize(&segment.text, &voice).await {
                    Ok(audio) => segment.audio = Some(audio),
                    Err(e) => {
                        warn!("speech synthesis failed for {}: {}", segment.speaker_id, e);
                        segment.audio = None;
                    }
                }
            }
            out.push(segment);
        }
        out
    }

    /// Alternates `arguments` between two debaters, `first` opening.
    pub fn debate_script<I, S>(first: &str, second: &str, arguments: I) -> Vec<Segment>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        arguments
            .into_iter()
            .enumerate()
            .map(|(round, argument)| {
                let speaker = if round % 2 == 0 { first } else { second };
                Segment::new(speaker, argument)
            })
            .collect()
    }

    /// Reads each card aloud: the term, then its definition.
    pub fn flashcard_review_script<'a, I>(host: &str, cards: I) -> Vec<Segment>
    where
        I: IntoIterator<Item = &'a FlashcardRecord>,
    {
        cards
            .into_iter()
            .flat_map(|card| {
                [
                    Segment::new(host, card.term.clone()),
                    Segment::new(host, card.definition.clone()),
                ]
            })
            .collect()
    }
}
