//! Local speech detection on caller PCM (WebRTC VAD).
//!
//! Used as a local fallback when the PBX streams audio but does not report talking events.

use crate::error::{VoiceError, VoiceResult};
use tracing::{debug, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// `detect_speech(chunk) -> bool` capability.
pub trait VoiceActivityDetector: Send + Sync {
    fn detect_speech(&self, chunk: &[i16]) -> bool;
}

/// Detector tuning. Defaults suit narrowband telephony audio.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Hz; one of 8000, 16000, 32000, 48000
    pub sample_rate: u32,

    /// 0 (quality) ..= 3 (very aggressive)
    pub mode: u8,

    /// Share of 30ms frames that must be voiced for the chunk to count as speech
    pub speech_ratio: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            mode: 3,
            speech_ratio: 0.5,
        }
    }
}

/// WebRTC VAD over whole chunks.
///
/// The underlying detector is not `Send`, so one is built per chunk; the session calls this
/// between awaits only.
pub struct WebRtcVad {
    config: VadConfig,
    frame_len: usize,
}

impl WebRtcVad {
    pub fn new(config: VadConfig) -> VoiceResult<Self> {
        info!(
            sample_rate = config.sample_rate,
            mode = config.mode,
            "initializing WebRTC VAD"
        );
        sample_rate(config.sample_rate)?;
        if config.mode > 3 {
            return Err(VoiceError::Config(format!(
                "VAD mode must be 0-3, got {}",
                config.mode
            )));
        }
        // 30ms frames
        let frame_len = (config.sample_rate as usize * 30) / 1000;
        Ok(Self { config, frame_len })
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn build(&self) -> VoiceResult<Vad> {
        let mode = match self.config.mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            _ => VadMode::VeryAggressive,
        };
        let mut vad = Vad::new();
        vad.set_mode(mode);
        vad.set_sample_rate(sample_rate(self.config.sample_rate)?);
        Ok(vad)
    }
}

fn sample_rate(hz: u32) -> VoiceResult<SampleRate> {
    match hz {
        8000 => Ok(SampleRate::Rate8kHz),
        16000 => Ok(SampleRate::Rate16kHz),
        32000 => Ok(SampleRate::Rate32kHz),
        48000 => Ok(SampleRate::Rate48kHz),
        other => Err(VoiceError::Config(format!(
            "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
            other
        ))),
    }
}

impl VoiceActivityDetector for WebRtcVad {
    fn detect_speech(&self, chunk: &[i16]) -> bool {
        let mut vad = match self.build() {
            Ok(vad) => vad,
            Err(e) => {
                debug!(error = %e, "VAD unavailable");
                return false;
            }
        };
        let mut frames = 0usize;
        let mut voiced = 0usize;
        for frame in chunk.chunks_exact(self.frame_len) {
            frames += 1;
            if let Ok(true) = vad.is_voice_segment(frame) {
                voiced += 1;
            }
        }
        if frames == 0 {
            return false;
        }
        let speech = voiced as f32 / frames as f32 >= self.config.speech_ratio;
        debug!(frames, voiced, speech, "VAD chunk");
        speech
    }
}
