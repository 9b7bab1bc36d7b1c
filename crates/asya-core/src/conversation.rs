//! Per-call conversation aggregate: transcript, dialog history and caller profile.
//!
//! Both the transcript and the history are append-only. The LLM never sees the whole
//! history; [`Conversation::llm_view`] returns the system prompt plus a bounded window of the
//! most recent exchanges, while the full record is kept for persistence.

use crate::profile::CallProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Client,
    Bot,
}

/// One utterance, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Chat role in the LLM history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One history entry (OpenAI-style `{role, content}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Transcript, history and profile of a single call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    transcript: Vec<TranscriptSegment>,
    history: Vec<ChatMessage>,
    pub profile: CallProfile,
}

impl Conversation {
    /// Start a conversation whose history opens with `system_prompt`.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        let mut history = Vec::new();
        if !system_prompt.trim().is_empty() {
            history.push(ChatMessage::new(ChatRole::System, system_prompt));
        }
        Self {
            transcript: Vec::new(),
            history,
            profile: CallProfile::default(),
        }
    }

    /// Client segment + `user` entry.
    pub fn record_client(&mut self, text: &str) {
        self.transcript.push(TranscriptSegment {
            speaker: Speaker::Client,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.history.push(ChatMessage::new(ChatRole::User, text));
    }

    /// `assistant` entry + bot segment.
    pub fn record_bot(&mut self, text: &str) {
        self.history.push(ChatMessage::new(ChatRole::Assistant, text));
        self.transcript.push(TranscriptSegment {
            speaker: Speaker::Bot,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn transcript(&self) -> &[TranscriptSegment] {
        &self.transcript
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// System prompt(s) followed by at most `window` exchanges (2 × `window` messages).
    ///
    /// A truncated view always resumes at a `user` message, never at an answer whose question
    /// fell out of the window.
    pub fn llm_view(&self, window: usize) -> Vec<ChatMessage> {
        let (system, dialog): (Vec<&ChatMessage>, Vec<&ChatMessage>) = self
            .history
            .iter()
            .partition(|m| m.role == ChatRole::System);
        let keep = window.saturating_mul(2);
        let skip = dialog.len().saturating_sub(keep);
        let mut tail = &dialog[skip..];
        if skip > 0 {
            let start = tail
                .iter()
                .position(|m| m.role == ChatRole::User)
                .unwrap_or(tail.len());
            tail = &tail[start..];
        }
        system
            .into_iter()
            .chain(tail.iter().copied())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_then_bot_keeps_order() {
        let mut conv = Conversation::new("prompt");
        conv.record_client("Здравствуйте");
        conv.record_bot("Добрый день!");

        let speakers: Vec<Speaker> = conv.transcript().iter().map(|s| s.speaker).collect();
        assert_eq!(speakers, vec![Speaker::Client, Speaker::Bot]);
        let roles: Vec<ChatRole> = conv.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::System, ChatRole::User, ChatRole::Assistant]);
    }

    #[test]
    fn llm_view_is_windowed() {
        let mut conv = Conversation::new("prompt");
        for i in 0..25 {
            conv.record_client(&format!("q{}", i));
            conv.record_bot(&format!("a{}", i));
        }
        let view = conv.llm_view(3);
        assert_eq!(view.len(), 1 + 6);
        assert_eq!(view[0].role, ChatRole::System);
        assert_eq!(view[1].content, "q22");
        assert_eq!(view.last().map(|m| m.content.as_str()), Some("a24"));
        // The full history is untouched.
        assert_eq!(conv.history().len(), 51);
        assert_eq!(conv.transcript().len(), 50);
    }

    #[test]
    fn short_history_is_returned_whole() {
        let mut conv = Conversation::new("prompt");
        conv.record_client("hi");
        assert_eq!(conv.llm_view(10).len(), 2);
    }

    #[test]
    fn truncated_view_starts_with_a_question() {
        let mut conv = Conversation::new("prompt");
        for i in 0..2 {
            conv.record_client(&format!("q{}", i));
            conv.record_bot(&format!("a{}", i));
        }
        conv.record_client("q2");

        let view = conv.llm_view(2);
        let contents: Vec<&str> = view.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["prompt", "q1", "a1", "q2"]);
    }

    #[test]
    fn untruncated_view_keeps_leading_greeting() {
        let mut conv = Conversation::new("prompt");
        conv.record_bot("Здравствуйте!");
        conv.record_client("Добрый день");
        assert_eq!(conv.llm_view(2).len(), 3);
    }

    #[test]
    fn blank_prompt_adds_no_system_entry() {
        let conv = Conversation::new("  ");
        assert!(conv.history().is_empty());
    }
}
