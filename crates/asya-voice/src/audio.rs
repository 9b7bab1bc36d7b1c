//! Call audio: the per-session PCM buffer and the clip handed to STT.
//!
//! Telephony audio is narrowband signed 16-bit mono. The buffer is owned by exactly one
//! session; starting a turn moves its contents out into an [`AudioClip`].

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Audio accumulated while the caller is speaking.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
        }
    }

    pub fn push(&mut self, chunk: &[i16]) {
        self.samples.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Shorter than `min` counts as noise, not an utterance.
    pub fn is_trivial(&self, min: Duration) -> bool {
        self.duration() < min
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Move the buffered audio out, leaving the buffer empty.
    pub fn take_clip(&mut self) -> AudioClip {
        AudioClip {
            samples: std::mem::take(&mut self.samples),
            sample_rate: self.sample_rate,
            captured_at: Utc::now(),
        }
    }
}

/// One caller utterance, ready for transcription.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub captured_at: DateTime<Utc>,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Encode as a 16-bit mono WAV file for upload.
    pub fn to_wav(&self) -> Vec<u8> {
        let data_len = (self.samples.len() * 2) as u32;
        let mut buf = Vec::with_capacity(44 + data_len as usize);
        // RIFF header
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        // fmt subchunk
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
        buf.extend_from_slice(&1u16.to_le_bytes()); // mono
        buf.extend_from_slice(&self.sample_rate.to_le_bytes());
        buf.extend_from_slice(&(self.sample_rate * 2).to_le_bytes()); // byte rate
        buf.extend_from_slice(&2u16.to_le_bytes()); // block align
        buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        // data subchunk
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        for s in &self.samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        buf
    }
}

/// Decode little-endian 16-bit PCM. A trailing odd byte is ignored.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(samples as u64 * 1_000_000 / sample_rate as u64)
}
