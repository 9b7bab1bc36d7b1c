//! Inbound call events and their decoding from Asterisk ARI JSON.

use crate::error::{VoiceError, VoiceResult};
use serde::Deserialize;

/// Events routed to a call session by call id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    CallStart { call_id: String, caller_number: String },
    SpeechStarted { call_id: String },
    SpeechFinished { call_id: String },
    /// The bot's media finished playing. `playback_id` is the id returned by `Telephony::play`.
    PlaybackFinished { call_id: String, playback_id: String },
    /// Raw caller PCM (16-bit mono at the dialog sample rate).
    Audio { call_id: String, samples: Vec<i16> },
    CallEnded { call_id: String },
}

impl CallEvent {
    pub fn call_id(&self) -> &str {
        match self {
            CallEvent::CallStart { call_id, .. }
            | CallEvent::SpeechStarted { call_id }
            | CallEvent::SpeechFinished { call_id }
            | CallEvent::PlaybackFinished { call_id, .. }
            | CallEvent::Audio { call_id, .. }
            | CallEvent::CallEnded { call_id } => call_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::CallStart { .. } => "call-start",
            CallEvent::SpeechStarted { .. } => "speech-started",
            CallEvent::SpeechFinished { .. } => "speech-finished",
            CallEvent::PlaybackFinished { .. } => "playback-finished",
            CallEvent::Audio { .. } => "audio",
            CallEvent::CallEnded { .. } => "call-ended",
        }
    }
}

#[derive(Debug, Deserialize)]
struct AriEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<AriChannel>,
    #[serde(default)]
    playback: Option<AriPlayback>,
}

#[derive(Debug, Deserialize)]
struct AriChannel {
    id: String,
    #[serde(default)]
    caller: Option<AriCaller>,
}

#[derive(Debug, Deserialize)]
struct AriCaller {
    #[serde(default)]
    number: String,
}

#[derive(Debug, Deserialize)]
struct AriPlayback {
    #[serde(default)]
    id: String,
    #[serde(default)]
    target_uri: String,
}

/// Decode one ARI event. `Ok(None)` for event types the dialog does not act on.
pub fn decode_ari_event(text: &str) -> VoiceResult<Option<CallEvent>> {
    let envelope: AriEnvelope =
        serde_json::from_str(text).map_err(|e| VoiceError::EventDecode(e.to_string()))?;

    if envelope.kind == "PlaybackFinished" {
        let Some(playback) = envelope.playback else {
            return Ok(None);
        };
        return Ok(playback
            .target_uri
            .strip_prefix("channel:")
            .filter(|id| !id.is_empty() && !playback.id.is_empty())
            .map(|id| CallEvent::PlaybackFinished {
                call_id: id.to_string(),
                playback_id: playback.id.clone(),
            }));
    }

    let Some(channel) = envelope.channel else {
        return Ok(None);
    };
    let call_id = channel.id;
    let event = match envelope.kind.as_str() {
        "StasisStart" => {
            let caller_number = channel
                .caller
                .map(|c| c.number)
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "unknown".to_string());
            CallEvent::CallStart {
                call_id,
                caller_number,
            }
        }
        "ChannelTalkingStarted" => CallEvent::SpeechStarted { call_id },
        "ChannelTalkingFinished" => CallEvent::SpeechFinished { call_id },
        "ChannelHangupComplete" | "StasisEnd" => CallEvent::CallEnded { call_id },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stasis_start_carries_caller() {
        let ev = decode_ari_event(
            r#"{"type":"StasisStart","channel":{"id":"1700.1","caller":{"number":"89123456789","name":""}}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            Some(CallEvent::CallStart {
                call_id: "1700.1".to_string(),
                caller_number: "89123456789".to_string()
            })
        );
    }

    #[test]
    fn missing_caller_is_unknown() {
        let ev = decode_ari_event(r#"{"type":"StasisStart","channel":{"id":"c1"}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(ev, CallEvent::CallStart { ref caller_number, .. } if caller_number == "unknown"));
    }

    #[test]
    fn talking_and_hangup_events() {
        let started = decode_ari_event(r#"{"type":"ChannelTalkingStarted","channel":{"id":"c1"}}"#).unwrap();
        assert_eq!(started.map(|e| e.kind()), Some("speech-started"));
        let finished = decode_ari_event(r#"{"type":"ChannelTalkingFinished","channel":{"id":"c1"},"duration":1200}"#).unwrap();
        assert_eq!(finished.map(|e| e.kind()), Some("speech-finished"));
        let hangup = decode_ari_event(r#"{"type":"ChannelHangupComplete","channel":{"id":"c1"}}"#).unwrap();
        assert_eq!(hangup.map(|e| e.kind()), Some("call-ended"));
        let end = decode_ari_event(r#"{"type":"StasisEnd","channel":{"id":"c1"}}"#).unwrap();
        assert_eq!(end.map(|e| e.kind()), Some("call-ended"));
    }

    #[test]
    fn playback_finished_uses_target_channel() {
        let ev = decode_ari_event(
            r#"{"type":"PlaybackFinished","playback":{"id":"p1","target_uri":"channel:c9","state":"done"}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            Some(CallEvent::PlaybackFinished {
                call_id: "c9".to_string(),
                playback_id: "p1".to_string(),
            })
        );
        let bridge = decode_ari_event(
            r#"{"type":"PlaybackFinished","playback":{"id":"p1","target_uri":"bridge:b1"}}"#,
        )
        .unwrap();
        assert!(bridge.is_none());
    }

    #[test]
    fn unrelated_and_broken_input() {
        assert!(decode_ari_event(r#"{"type":"ChannelDtmfReceived","channel":{"id":"c1"},"digit":"1"}"#)
            .unwrap()
            .is_none());
        assert!(decode_ari_event("not json").is_err());
    }
}
