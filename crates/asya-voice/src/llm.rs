//! Dialog brain: `generate(history) -> LlmReply`.
//!
//! The model must answer with one JSON object carrying `reasoning`, `answer` and
//! `system_info`. Anything else, including a reply missing one of the three fields, is a
//! [`VoiceError::MalformedReply`] that keeps the raw payload for logging.

use crate::error::{VoiceError, VoiceResult};
use asya_core::{ChatMessage, LlmSettings};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Structured model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmReply {
    /// Diagnostic only, never spoken.
    pub reasoning: String,
    /// Text spoken to the caller.
    pub answer: String,
    /// Profile-update directive(s), may be empty.
    pub system_info: String,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(&self, history: &[ChatMessage]) -> VoiceResult<LlmReply>;
}

/// Parse a raw completion into an [`LlmReply`]. A ```` ```json ```` fence is unwrapped first.
pub fn parse_llm_reply(raw: &str) -> VoiceResult<LlmReply> {
    let body = strip_code_fence(raw);
    let reply: LlmReply = serde_json::from_str(body).map_err(|e| VoiceError::MalformedReply {
        reason: e.to_string(),
        raw: raw.to_string(),
    })?;
    if reply.answer.trim().is_empty() {
        return Err(VoiceError::MalformedReply {
            reason: "empty answer".to_string(),
            raw: raw.to_string(),
        });
    }
    Ok(reply)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Placeholder brain: always gives the same answer and no profile update.
#[derive(Debug, Clone)]
pub struct PlaceholderLlm {
    pub answer: String,
}

impl Default for PlaceholderLlm {
    fn default() -> Self {
        Self {
            answer: "Спасибо, я вас поняла.".to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for PlaceholderLlm {
    async fn generate(&self, _history: &[ChatMessage]) -> VoiceResult<LlmReply> {
        Ok(LlmReply {
            reasoning: "placeholder".to_string(),
            answer: self.answer.clone(),
            system_info: String::new(),
        })
    }
}

// OpenAI-compatible request/response
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions over any OpenAI-compatible endpoint.
pub struct OpenAiChat {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(settings: &LlmSettings) -> VoiceResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::Config("llm.api_key is not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Llm(e.to_string()))?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            client,
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiChat {
    async fn generate(&self, history: &[ChatMessage]) -> VoiceResult<LlmReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: history,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Llm(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(VoiceError::Llm(format!("chat API error {}: {}", status, text)));
        }
        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::Llm(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        parse_llm_reply(&content)
    }
}
