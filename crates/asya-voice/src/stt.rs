//! **Speech-to-Text (STT)**: turn a caller's [`AudioClip`] into text for the dialog brain.
//!
//! Implement `SttBackend` for any engine. `OpenAiStt` talks to an OpenAI-compatible
//! `/audio/transcriptions` endpoint; `PlaceholderStt` returns a fixed string for offline runs.

use crate::audio::AudioClip;
use crate::error::{VoiceError, VoiceResult};
use asya_core::SttSettings;
use async_trait::async_trait;
use std::time::Duration;

/// Backend for converting call audio to text. Return an empty string if nothing was said.
#[async_trait]
pub trait SttBackend: Send + Sync {
    async fn transcribe(&self, audio: &AudioClip) -> VoiceResult<String>;
}

/// Placeholder STT: returns a fixed string. Use for running the call loop without an API.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// Fixed transcript; `None` describes the clip instead.
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

#[async_trait]
impl SttBackend for PlaceholderStt {
    async fn transcribe(&self, audio: &AudioClip) -> VoiceResult<String> {
        if let Some(ref r) = self.response {
            return Ok(r.clone());
        }
        Ok(format!(
            "[STT placeholder: {} samples, {:.1}s]",
            audio.samples.len(),
            audio.duration().as_secs_f32()
        ))
    }
}

/// `/audio/transcriptions` client for any OpenAI-compatible speech recognizer.
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    pub base_url: String,
    pub api_key: String,
    /// whisper-1, gpt-4o-transcribe, ...
    pub model: String,
    /// ISO-639-1 hint, e.g. `ru`.
    pub language: String,
    client: reqwest::Client,
}

impl OpenAiStt {
    pub fn new(settings: &SttSettings) -> VoiceResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::Config("stt.api_key is not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            language: settings.language.clone(),
            client,
        })
    }
}

#[async_trait]
impl SttBackend for OpenAiStt {
    async fn transcribe(&self, audio: &AudioClip) -> VoiceResult<String> {
        if audio.samples.is_empty() {
            return Ok(String::new());
        }
        let url = format!("{}/audio/transcriptions", self.base_url);
        let part = reqwest::multipart::Part::bytes(audio.to_wav())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(text)
    }
}
