//! Asya configuration.
//!
//! Loaded with the `config` crate: built-in defaults, then an optional TOML file, then the
//! environment (`ASYA_` prefix, `__` between sections).
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | ASYA_CONFIG | config/asya | Path of the TOML file (extension optional). |
//! | ASYA_LISTEN_ADDR | 127.0.0.1:8010 | Daemon event/media endpoint. |
//! | ASYA_STORAGE_PATH | ./data | Base directory of the sled call store. |
//! | ASYA_DIALOG__HISTORY_WINDOW | 10 | Exchanges visible to the LLM. |
//! | ASYA_DIALOG__TURN_TIMEOUT_MS | 15000 | Deadline for one turn. |
//! | ASYA_ARI__BASE_URL | http://localhost:8088/ari | Asterisk REST interface. |
//! | ASYA_LLM__MODEL | gpt-4o-mini | Chat model for the dialog brain. |

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_SYSTEM_PROMPT: &str = "Ты — Ася, голосовой ассистент компании. Веди вежливый \
диалог на русском языке, выясняй имя, город, организацию и потребность клиента. \
Отвечай строго JSON-объектом с полями \"reasoning\", \"answer\" и \"system_info\". \
В \"system_info\" сообщай об обновлении профиля в формате: Поле '<название>' обновлено: <значение>.";

fn default_history_window() -> usize {
    10
}

fn default_turn_timeout_ms() -> u64 {
    15_000
}

fn default_min_utterance_ms() -> u64 {
    300
}

fn default_end_of_speech_ms() -> u64 {
    800
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_reprompt_text() -> String {
    "Извините, я вас не расслышала. Повторите, пожалуйста.".to_string()
}

fn default_fallback_text() -> String {
    "Извините, произошла заминка. Пожалуйста, повторите ваш вопрос.".to_string()
}

fn default_fallback_audio() -> String {
    "sound:asya-fallback".to_string()
}

/// Dialog behaviour: windowing, deadlines and the fixed utterances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogSettings {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    /// Buffered audio shorter than this is treated as noise.
    #[serde(default = "default_min_utterance_ms")]
    pub min_utterance_ms: u64,
    /// Trailing silence after which the local VAD closes an utterance.
    #[serde(default = "default_end_of_speech_ms")]
    pub end_of_speech_ms: u64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// When set, the prompt is read from this file instead of `system_prompt`.
    #[serde(default)]
    pub system_prompt_path: Option<String>,
    #[serde(default = "default_reprompt_text")]
    pub reprompt_text: String,
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
    /// Pre-recorded media played when speech synthesis itself fails.
    #[serde(default = "default_fallback_audio")]
    pub fallback_audio: String,
    #[serde(default)]
    pub greeting_text: Option<String>,
    #[serde(default)]
    pub duplicate_cities: Vec<String>,
    #[serde(default)]
    pub pronunciation_path: Option<String>,
}

impl Default for DialogSettings {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            turn_timeout_ms: default_turn_timeout_ms(),
            min_utterance_ms: default_min_utterance_ms(),
            end_of_speech_ms: default_end_of_speech_ms(),
            sample_rate: default_sample_rate(),
            system_prompt: default_system_prompt(),
            system_prompt_path: None,
            reprompt_text: default_reprompt_text(),
            fallback_text: default_fallback_text(),
            fallback_audio: default_fallback_audio(),
            greeting_text: None,
            duplicate_cities: Vec::new(),
            pronunciation_path: None,
        }
    }
}

impl DialogSettings {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }

    pub fn min_utterance(&self) -> Duration {
        Duration::from_millis(self.min_utterance_ms)
    }

    pub fn end_of_speech(&self) -> Duration {
        Duration::from_millis(self.end_of_speech_ms)
    }

    /// The system prompt text, read from `system_prompt_path` when configured.
    pub fn load_system_prompt(&self) -> CoreResult<String> {
        match self.system_prompt_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => Ok(std::fs::read_to_string(path)?),
            _ => Ok(self.system_prompt.clone()),
        }
    }
}

fn default_ari_base_url() -> String {
    "http://localhost:8088/ari".to_string()
}

fn default_ari_app() -> String {
    "asya".to_string()
}

fn default_recording_format() -> String {
    "wav".to_string()
}

/// Asterisk REST interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AriSettings {
    #[serde(default = "default_ari_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_ari_app")]
    pub app: String,
    #[serde(default = "default_recording_format")]
    pub recording_format: String,
}

impl Default for AriSettings {
    fn default() -> Self {
        Self {
            base_url: default_ari_base_url(),
            username: String::new(),
            password: String::new(),
            app: default_ari_app(),
            recording_format: default_recording_format(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    512
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_api_base")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_language() -> String {
    "ru".to_string()
}

/// OpenAI-compatible transcription endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSettings {
    #[serde(default = "default_api_base")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            api_key: None,
            model: default_stt_model(),
            language: default_language(),
        }
    }
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "shimmer".to_string()
}

fn default_sounds_dir() -> String {
    "/var/lib/asterisk/sounds".to_string()
}

/// OpenAI-compatible speech endpoint. Synthesized files are written to `sounds_dir`, which must
/// be on the PBX sound search path (`sound:<name>` media references).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    #[serde(default = "default_api_base")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_sounds_dir")]
    pub sounds_dir: String,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            api_key: None,
            model: default_tts_model(),
            voice: default_voice(),
            sounds_dir: default_sounds_dir(),
        }
    }
}

/// Full Asya configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyaConfig {
    pub app_name: String,
    pub listen_addr: String,
    /// Base directory of the sled call store.
    pub storage_path: String,
    #[serde(default)]
    pub dialog: DialogSettings,
    #[serde(default)]
    pub ari: AriSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub stt: SttSettings,
    #[serde(default)]
    pub tts: TtsSettings,
}

impl Default for AsyaConfig {
    fn default() -> Self {
        Self {
            app_name: "Asya".to_string(),
            listen_addr: "127.0.0.1:8010".to_string(),
            storage_path: "./data".to_string(),
            dialog: DialogSettings::default(),
            ari: AriSettings::default(),
            llm: LlmSettings::default(),
            stt: SttSettings::default(),
            tts: TtsSettings::default(),
        }
    }
}

impl AsyaConfig {
    /// Load config from file and environment. Precedence: env > `ASYA_CONFIG` file > defaults.
    pub fn load() -> CoreResult<Self> {
        let config_path = std::env::var("ASYA_CONFIG").unwrap_or_else(|_| "config/asya".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", "Asya")?
            .set_default("listen_addr", "127.0.0.1:8010")?
            .set_default("storage_path", "./data")?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder.add_source(config::File::with_name(&config_path).required(false))
        };

        let built = builder
            .add_source(config::Environment::with_prefix("ASYA").separator("__"))
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.dialog.history_window == 0 {
            return Err(CoreError::Config("dialog.history_window must be at least 1".to_string()));
        }
        if self.dialog.turn_timeout_ms == 0 {
            return Err(CoreError::Config("dialog.turn_timeout_ms must be positive".to_string()));
        }
        if !matches!(self.dialog.sample_rate, 8000 | 16000 | 32000 | 48000) {
            return Err(CoreError::Config(format!(
                "dialog.sample_rate must be 8000, 16000, 32000 or 48000 Hz, got {}",
                self.dialog.sample_rate
            )));
        }
        Ok(())
    }
}
