//! **Interrupt controller**: the barge-in kill switch.
//!
//! A turn pipeline may only issue `play` while holding the [`PlaybackGate`] and only if its
//! cancellation token is still live. Barge-in cancels the token first, then takes the gate, so
//! a cancelled answer is either never played or is stopped right after its `play` returned.

use crate::audio::AudioBuffer;
use crate::telephony::Telephony;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug)]
struct ActivePlayback {
    turn_id: u64,
    playback_id: String,
}

/// Which turn's media is currently playing on the call, and under which playback id.
#[derive(Debug, Default)]
pub struct PlaybackSlot {
    active: Option<ActivePlayback>,
}

impl PlaybackSlot {
    pub(crate) fn start(&mut self, turn_id: u64, playback_id: String) {
        self.active = Some(ActivePlayback { turn_id, playback_id });
    }

    pub(crate) fn take(&mut self) -> Option<u64> {
        self.active.take().map(|a| a.turn_id)
    }

    /// Clear the slot only if `playback_id` is the media it tracks.
    fn finish(&mut self, playback_id: &str) -> Option<u64> {
        let tracked = self
            .active
            .as_ref()
            .is_some_and(|a| a.playback_id == playback_id);
        if tracked {
            self.take()
        } else {
            None
        }
    }
}

/// Serializes `play` against barge-in for one call.
#[derive(Debug, Clone, Default)]
pub struct PlaybackGate {
    slot: Arc<Mutex<PlaybackSlot>>,
}

impl PlaybackGate {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, PlaybackSlot> {
        self.slot.lock().await
    }

    /// The telephony side reported the end of `playback_id`. Returns the turn it belonged to;
    /// `None` for media that was already stopped or replaced.
    pub async fn finish(&self, playback_id: &str) -> Option<u64> {
        self.slot.lock().await.finish(playback_id)
    }

    /// Turn whose media is playing.
    pub async fn active(&self) -> Option<u64> {
        self.slot.lock().await.active.as_ref().map(|a| a.turn_id)
    }
}

/// What a barge-in did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BargeIn {
    /// Turn whose playback was stopped, if any was playing.
    pub stopped_turn: Option<u64>,
    pub discarded_samples: usize,
    pub stop_failed: bool,
}

/// Cancels in-flight turns and silences the bot.
pub struct InterruptController {
    call_id: String,
    telephony: Arc<dyn Telephony>,
    gate: PlaybackGate,
    token: CancellationToken,
    command_timeout: Duration,
}

impl InterruptController {
    pub fn new(call_id: impl Into<String>, telephony: Arc<dyn Telephony>, command_timeout: Duration) -> Self {
        Self {
            call_id: call_id.into(),
            telephony,
            gate: PlaybackGate::default(),
            token: CancellationToken::new(),
            command_timeout,
        }
    }

    pub fn gate(&self) -> PlaybackGate {
        self.gate.clone()
    }

    /// Token for the next turn. Stays valid until the next barge-in or call end.
    pub fn turn_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Caller spoke over the bot: cancel the in-flight turn, stop playback, drop stale audio.
    pub async fn notify_speech_while_speaking(&mut self, buffer: &mut AudioBuffer) -> BargeIn {
        let cancelled = std::mem::replace(&mut self.token, CancellationToken::new());
        cancelled.cancel();

        let mut slot = self.gate.lock().await;
        let stopped_turn = slot.take();
        let mut stop_failed = false;
        if stopped_turn.is_some() {
            match tokio::time::timeout(self.command_timeout, self.telephony.stop_playback(&self.call_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stop_failed = true;
                    warn!(call_id = %self.call_id, error = %e, "stop_playback failed");
                }
                Err(_) => {
                    stop_failed = true;
                    warn!(call_id = %self.call_id, "stop_playback timed out");
                }
            }
        }
        drop(slot);

        let discarded_samples = buffer.len();
        buffer.clear();
        info!(
            call_id = %self.call_id,
            stopped_turn = ?stopped_turn,
            discarded_samples,
            "barge-in"
        );
        BargeIn {
            stopped_turn,
            discarded_samples,
            stop_failed,
        }
    }

    /// Call ended: cancel whatever is in flight. Nothing is stopped on a dead channel.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTelephony {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Telephony for CountingTelephony {
        async fn start_recording(&self, _call_id: &str) -> VoiceResult<()> {
            Ok(())
        }
        async fn play(&self, _call_id: &str, _audio_ref: &str) -> VoiceResult<String> {
            Ok("pb-1".to_string())
        }
        async fn stop_playback(&self, _call_id: &str) -> VoiceResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn barge_in_stops_active_playback() {
        let telephony = Arc::new(CountingTelephony::default());
        let mut ctl = InterruptController::new("c1", telephony.clone(), Duration::from_secs(1));
        let old = ctl.turn_token();
        ctl.gate().lock().await.start(7, "pb-7".to_string());

        let mut buffer = AudioBuffer::new(8000);
        buffer.push(&[1; 160]);
        let barge = ctl.notify_speech_while_speaking(&mut buffer).await;

        assert!(old.is_cancelled());
        assert!(!ctl.turn_token().is_cancelled());
        assert_eq!(barge.stopped_turn, Some(7));
        assert_eq!(barge.discarded_samples, 160);
        assert!(buffer.is_empty());
        assert_eq!(telephony.stops.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.gate().active().await, None);
    }

    #[tokio::test]
    async fn finish_ignores_other_playbacks() {
        let gate = PlaybackGate::default();
        gate.lock().await.start(2, "pb-2".to_string());

        assert_eq!(gate.finish("pb-1").await, None);
        assert_eq!(gate.active().await, Some(2));
        assert_eq!(gate.finish("pb-2").await, Some(2));
        assert_eq!(gate.active().await, None);
    }

    #[tokio::test]
    async fn barge_in_without_playback_sends_no_stop() {
        let telephony = Arc::new(CountingTelephony::default());
        let mut ctl = InterruptController::new("c1", telephony.clone(), Duration::from_secs(1));
        let barge = ctl.notify_speech_while_speaking(&mut AudioBuffer::new(8000)).await;
        assert_eq!(barge.stopped_turn, None);
        assert_eq!(telephony.stops.load(Ordering::SeqCst), 0);
    }
}
