//! Telephony control plane: recording and playback commands for a live call.
//!
//! `AriClient` drives Asterisk through its REST interface. Each `play` gets a client-chosen
//! playback id so `stop_playback` can cancel exactly the media that is still running.

use crate::error::{VoiceError, VoiceResult};
use asya_core::AriSettings;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};

/// Outbound telephony commands.
#[async_trait]
pub trait Telephony: Send + Sync {
    async fn start_recording(&self, call_id: &str) -> VoiceResult<()>;

    /// Start media on the call. Returns the playback id later reported by playback-finished.
    async fn play(&self, call_id: &str, audio_ref: &str) -> VoiceResult<String>;

    /// Stop whatever is playing on the call. No-op when nothing is.
    async fn stop_playback(&self, call_id: &str) -> VoiceResult<()>;

    /// Drop per-call bookkeeping once the call is over.
    fn release(&self, _call_id: &str) {}
}

/// Asterisk REST interface client.
pub struct AriClient {
    base_url: String,
    username: String,
    password: String,
    recording_format: String,
    /// call id -> playback id of the last `play`
    playbacks: DashMap<String, String>,
    client: reqwest::Client,
}

impl AriClient {
    pub fn new(settings: &AriSettings) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VoiceError::Telephony(e.to_string()))?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            recording_format: settings.recording_format.clone(),
            playbacks: DashMap::new(),
            client,
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> VoiceResult<StatusCode> {
        let res = req
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| VoiceError::Telephony(format!("{}: {}", what, e)))?;
        let status = res.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(status);
        }
        let body = res.text().await.unwrap_or_default();
        Err(VoiceError::Telephony(format!("{}: {} {}", what, status, body)))
    }
}

#[async_trait]
impl Telephony for AriClient {
    async fn start_recording(&self, call_id: &str) -> VoiceResult<()> {
        let url = format!("{}/channels/{}/record", self.base_url, call_id);
        let name = format!("call-{}", call_id);
        let req = self.client.post(&url).query(&[
            ("name", name.as_str()),
            ("format", self.recording_format.as_str()),
            ("ifExists", "overwrite"),
            ("beep", "false"),
            ("terminateOn", "none"),
        ]);
        if self.send(req, "start recording").await? == StatusCode::NOT_FOUND {
            return Err(VoiceError::Telephony(format!("channel {} not found", call_id)));
        }
        info!(call_id = %call_id, recording = %name, "recording started");
        Ok(())
    }

    async fn play(&self, call_id: &str, audio_ref: &str) -> VoiceResult<String> {
        let playback_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/channels/{}/play/{}", self.base_url, call_id, playback_id);
        let req = self.client.post(&url).query(&[("media", audio_ref)]);
        if self.send(req, "play").await? == StatusCode::NOT_FOUND {
            return Err(VoiceError::Telephony(format!("channel {} not found", call_id)));
        }
        debug!(call_id = %call_id, playback_id = %playback_id, media = %audio_ref, "playback started");
        self.playbacks.insert(call_id.to_string(), playback_id.clone());
        Ok(playback_id)
    }

    async fn stop_playback(&self, call_id: &str) -> VoiceResult<()> {
        let Some((_, playback_id)) = self.playbacks.remove(call_id) else {
            return Ok(());
        };
        let url = format!("{}/playbacks/{}", self.base_url, playback_id);
        // 404: the playback already finished on its own.
        let status = self.send(self.client.delete(&url), "stop playback").await?;
        debug!(call_id = %call_id, playback_id = %playback_id, status = %status, "playback stopped");
        Ok(())
    }

    fn release(&self, call_id: &str) {
        self.playbacks.remove(call_id);
    }
}

/// Telephony that only logs. Lets the daemon run without a PBX.
#[derive(Debug, Default)]
pub struct LogOnlyTelephony;

#[async_trait]
impl Telephony for LogOnlyTelephony {
    async fn start_recording(&self, call_id: &str) -> VoiceResult<()> {
        info!(call_id = %call_id, "start_recording (log only)");
        Ok(())
    }

    async fn play(&self, call_id: &str, audio_ref: &str) -> VoiceResult<String> {
        let playback_id = uuid::Uuid::new_v4().to_string();
        info!(call_id = %call_id, media = %audio_ref, playback_id = %playback_id, "play (log only)");
        Ok(playback_id)
    }

    async fn stop_playback(&self, call_id: &str) -> VoiceResult<()> {
        info!(call_id = %call_id, "stop_playback (log only)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_without_playback_is_noop() {
        let ari = AriClient::new(&AriSettings::default()).unwrap();
        // No request is made: nothing was played on this call.
        assert!(ari.stop_playback("c1").await.is_ok());
    }
}
