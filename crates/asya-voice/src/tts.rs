//! **Text-to-Speech (TTS)**: synthesize the bot's reply into media the PBX can play.
//!
//! `synthesize` returns an audio reference (`sound:<name>`), not bytes: playback happens on the
//! telephony side, so the adapter writes the file where the PBX looks for sounds.

use crate::error::{VoiceError, VoiceResult};
use asya_core::TtsSettings;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Backend that turns text into a playable media reference.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> VoiceResult<String>;
}

/// Placeholder TTS: always answers with the same pre-recorded media.
#[derive(Debug, Clone)]
pub struct PlaceholderTts {
    pub audio_ref: String,
}

impl Default for PlaceholderTts {
    fn default() -> Self {
        Self {
            audio_ref: "sound:beep".to_string(),
        }
    }
}

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize(&self, _text: &str) -> VoiceResult<String> {
        Ok(self.audio_ref.clone())
    }
}

/// Production TTS backend: OpenAI-compatible `/audio/speech` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    /// tts-1 (fast) or tts-1-hd.
    pub model: String,
    /// alloy, echo, fable, onyx, nova, shimmer, ...
    pub voice: String,
    pub sounds_dir: PathBuf,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(settings: &TtsSettings) -> VoiceResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::Config("tts.api_key is not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            sounds_dir: PathBuf::from(&settings.sounds_dir),
            client,
        })
    }
}

#[async_trait]
impl TtsBackend for OpenAiTts {
    async fn synthesize(&self, text: &str) -> VoiceResult<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::Tts("nothing to synthesize".to_string()));
        }
        let url = format!("{}/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "wav",
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;

        let name = format!("asya-{}", uuid::Uuid::new_v4());
        let path = self.sounds_dir.join(format!("{}.wav", name));
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "speech written");
        Ok(media_ref(&name))
    }
}

/// `sound:` media reference for a file name without extension.
pub fn media_ref(name: &str) -> String {
    format!("sound:{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_returns_fixed_media() {
        let tts = PlaceholderTts::default();
        assert_eq!(tts.synthesize("привет").await.unwrap(), "sound:beep");
    }

    #[test]
    fn media_ref_has_sound_scheme() {
        assert_eq!(media_ref("asya-1"), "sound:asya-1");
    }
}
