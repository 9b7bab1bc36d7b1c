//! Shared, read-only inputs of every call: the capability adapters and the dialog policy.

use crate::error::VoiceResult;
use crate::llm::LlmBackend;
use crate::stt::SttBackend;
use crate::telephony::Telephony;
use crate::tts::TtsBackend;
use asya_core::{CityDirectory, DialogSettings, PronunciationDictionary};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Upper bound for one telephony command acknowledgement.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// The engines a call talks to.
#[derive(Clone)]
pub struct Capabilities {
    pub stt: Arc<dyn SttBackend>,
    pub llm: Arc<dyn LlmBackend>,
    pub tts: Arc<dyn TtsBackend>,
    pub telephony: Arc<dyn Telephony>,
}

/// Dialog behaviour resolved from [`DialogSettings`] once at startup.
#[derive(Debug, Clone)]
pub struct DialogPolicy {
    pub system_prompt: String,
    /// Exchanges visible to the LLM beyond the system prompt.
    pub history_window: usize,
    pub turn_timeout: Duration,
    pub command_timeout: Duration,
    pub min_utterance: Duration,
    /// Trailing silence that ends an utterance when no speech-finished event arrives.
    pub end_of_speech: Duration,
    pub sample_rate: u32,
    pub reprompt_text: String,
    pub fallback_text: String,
    pub fallback_audio: String,
    pub greeting_text: Option<String>,
    pub cities: CityDirectory,
    pub pronunciation: PronunciationDictionary,
}

impl DialogPolicy {
    /// Read the prompt file and pronunciation dictionary named by `settings`.
    pub fn from_settings(settings: &DialogSettings) -> VoiceResult<Self> {
        let pronunciation = match settings.pronunciation_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => {
                let dict = PronunciationDictionary::load(path)?;
                info!(path = %path, terms = dict.len(), "pronunciation dictionary loaded");
                dict
            }
            _ => PronunciationDictionary::default(),
        };
        Ok(Self {
            system_prompt: settings.load_system_prompt()?,
            pronunciation,
            ..Self::inline(settings)
        })
    }

    /// Policy from inline settings only; no files are read.
    pub fn inline(settings: &DialogSettings) -> Self {
        Self {
            system_prompt: settings.system_prompt.clone(),
            history_window: settings.history_window,
            turn_timeout: settings.turn_timeout(),
            command_timeout: COMMAND_TIMEOUT,
            min_utterance: settings.min_utterance(),
            end_of_speech: settings.end_of_speech(),
            sample_rate: settings.sample_rate,
            reprompt_text: settings.reprompt_text.clone(),
            fallback_text: settings.fallback_text.clone(),
            fallback_audio: settings.fallback_audio.clone(),
            greeting_text: settings
                .greeting_text
                .clone()
                .filter(|g| !g.trim().is_empty()),
            cities: CityDirectory::new(&settings.duplicate_cities),
            pronunciation: PronunciationDictionary::default(),
        }
    }
}

impl Default for DialogPolicy {
    fn default() -> Self {
        Self::inline(&DialogSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn files_are_read_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("prompt.txt");
        let dict = dir.path().join("terms.toml");
        fs::write(&prompt, "Ты Ася, менеджер по продажам.").unwrap();
        fs::write(&dict, "[terms]\n\"ОБМ\" = \"о бэ эм\"\n").unwrap();

        let settings = DialogSettings {
            system_prompt_path: Some(prompt.display().to_string()),
            pronunciation_path: Some(dict.display().to_string()),
            greeting_text: Some("   ".to_string()),
            ..DialogSettings::default()
        };
        let policy = DialogPolicy::from_settings(&settings).unwrap();

        assert_eq!(policy.system_prompt, "Ты Ася, менеджер по продажам.");
        assert_eq!(policy.pronunciation.len(), 1);
        assert_eq!(policy.greeting_text, None);
        assert_eq!(policy.command_timeout, COMMAND_TIMEOUT);
    }

    #[test]
    fn missing_prompt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DialogSettings {
            system_prompt_path: Some(dir.path().join("absent.txt").display().to_string()),
            ..DialogSettings::default()
        };
        assert!(DialogPolicy::from_settings(&settings).is_err());
    }
}
