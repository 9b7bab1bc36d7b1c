//! Error types for the Asya dialog orchestrator

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors raised by capability adapters and the call pipeline
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// The model answered, but not with the `{reasoning, answer, system_info}` object.
    #[error("LLM reply malformed: {reason}")]
    MalformedReply { reason: String, raw: String },

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Telephony command failed: {0}")]
    Telephony(String),

    #[error(transparent)]
    Core(#[from] asya_core::CoreError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Event decode error: {0}")]
    EventDecode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
