//! asya-core: data layer of the Asya call assistant.
//!
//! Holds the per-call aggregate (transcript, dialog history, caller profile), configuration,
//! text helpers applied before speech synthesis, and the sled-backed call store that receives
//! one commit per finished call.

mod config;
mod conversation;
mod error;
mod phone;
mod profile;
mod pronunciation;
mod store;

pub use config::{AriSettings, AsyaConfig, DialogSettings, LlmSettings, SttSettings, TtsSettings};
pub use conversation::{ChatMessage, ChatRole, Conversation, Speaker, TranscriptSegment};
pub use error::{CoreError, CoreResult};
pub use phone::{is_valid_phone, normalize_phone};
pub use profile::{
    parse_directive, parse_system_info, CallProfile, CityDirectory, DirectiveParse, ProfileField,
};
pub use pronunciation::PronunciationDictionary;
pub use store::{CallRecord, CallStats, CallStore, ClientRecord, SledCallStore, StoredCall};
