//! # Asya Voice - call dialog orchestration
//!
//! Coordinates VAD, STT, the LLM dialog brain and TTS into a correct turn sequence for every
//! live phone call, including barge-in while the bot is speaking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  telephony events (ARI) ──▶ SessionRegistry ── call_id ──┐      │
//! │                                                          ▼      │
//! │  ┌──────────────┐   spawn    ┌──────────────────────────────┐   │
//! │  │ CallSession  │ ─────────▶ │ TurnPipeline                 │   │
//! │  │ (state, buf) │ ◀───────── │ STT → LLM → profile → TTS    │   │
//! │  └──────┬───────┘  report    └──────────────┬───────────────┘   │
//! │         │ barge-in                          │ play (gated)      │
//! │  ┌──────▼────────────┐    stop_playback   ┌─▼──────────┐        │
//! │  │ InterruptController│ ────────────────▶ │ Telephony  │        │
//! │  └───────────────────┘                    └────────────┘        │
//! │  call-ended ──▶ CallStore::commit_call (once)                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod error;
pub mod events;
pub mod interrupt;
pub mod llm;
pub mod policy;
pub mod registry;
pub mod session;
pub mod stt;
pub mod telephony;
pub mod tts;
pub mod turn;
pub mod vad;

pub use audio::{pcm_from_le_bytes, AudioBuffer, AudioClip};
pub use error::{VoiceError, VoiceResult};
pub use events::{decode_ari_event, CallEvent};
pub use interrupt::{BargeIn, InterruptController, PlaybackGate};
pub use llm::{parse_llm_reply, LlmBackend, LlmReply, OpenAiChat, PlaceholderLlm};
pub use policy::{Capabilities, DialogPolicy};
pub use registry::SessionRegistry;
pub use session::{CallSession, CallState, SessionDeps, UnsavedCalls};
pub use stt::{OpenAiStt, PlaceholderStt, SttBackend};
pub use telephony::{AriClient, LogOnlyTelephony, Telephony};
pub use tts::{media_ref, OpenAiTts, PlaceholderTts, TtsBackend};
pub use turn::{FallbackReason, StepOutcome, TurnInput, TurnOutcome, TurnPipeline, TurnReport};
pub use vad::{VadConfig, VoiceActivityDetector, WebRtcVad};
