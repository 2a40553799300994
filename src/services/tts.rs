use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::SynthesisError;

/// Text-to-speech collaborator. Returns base64 PCM16 at the output rate.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String, SynthesisError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    audio: String,
}

/// Speech service reached over HTTP (`POST {base_url}/synthesize`).
#[derive(Clone)]
pub struct HttpSpeechSynthesizer {
    client: Client,
    base_url: String,
}

impl HttpSpeechSynthesizer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String, SynthesisError> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.base_url))
            .json(&SynthesisRequest { text, voice })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SynthesisError::Status(response.status().as_u16()));
        }

        let body: SynthesisResponse = response.json().await?;
        if body.audio.trim().is_empty() {
            return Err(SynthesisError::Empty);
        }
        Ok(body.audio)
    }
}
