//! **Turn pipeline**: one listen → transcribe → reason → reply → speak cycle.
//!
//! Every remote step yields a [`StepOutcome`]: the value, a substituted fallback value with its
//! reason, or a fatal error. STT, LLM and TTS problems never abort a turn; the caller hears the
//! re-prompt, the fallback apology or the pre-recorded fallback media instead. Only telephony
//! failures are fatal.
//!
//! Cancellation is cooperative. The token is checked at step boundaries and, for the appends,
//! while holding the conversation lock, so a cancelled turn never appends anything new. A remote
//! call in flight is abandoned as soon as the token fires; that is the only `Fatal` outcome of
//! the STT, LLM and TTS steps. `play` goes through the [`PlaybackGate`].

use crate::audio::AudioClip;
use crate::error::VoiceError;
use crate::interrupt::PlaybackGate;
use crate::llm::LlmReply;
use crate::policy::{Capabilities, DialogPolicy};
use asya_core::{parse_system_info, CallProfile, ChatMessage, Conversation, DirectiveParse};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a fallback value was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    EmptyTranscript,
    SttFailed,
    LlmMalformed,
    LlmUnavailable,
    TtsFailed,
    DeadlineExceeded,
}

/// Result of one pipeline step.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Success(T),
    Fallback(T, FallbackReason),
    Fatal(VoiceError),
}

/// What starts a turn.
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// Caller audio collected between speech-started and speech-finished.
    Utterance(AudioClip),
    /// Bot-initiated line, e.g. the greeting after call-start.
    Greeting(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Played { audio_ref: String },
    Cancelled,
    /// Telephony rejected the playback; nothing was heard.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub turn_id: u64,
    pub outcome: TurnOutcome,
    pub fallbacks: Vec<FallbackReason>,
}

/// Executes turns for one call. Cheap to clone into a task.
#[derive(Clone)]
pub struct TurnPipeline {
    call_id: String,
    caps: Capabilities,
    policy: Arc<DialogPolicy>,
    conversation: Arc<Mutex<Conversation>>,
    gate: PlaybackGate,
}

impl TurnPipeline {
    pub fn new(
        call_id: impl Into<String>,
        caps: Capabilities,
        policy: Arc<DialogPolicy>,
        conversation: Arc<Mutex<Conversation>>,
        gate: PlaybackGate,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            caps,
            policy,
            conversation,
            gate,
        }
    }

    pub async fn run(&self, turn_id: u64, input: TurnInput, cancel: CancellationToken) -> TurnReport {
        let deadline = Instant::now() + self.policy.turn_timeout;
        let mut fallbacks = Vec::new();
        let outcome = self.execute(turn_id, input, deadline, &cancel, &mut fallbacks).await;
        match &outcome {
            TurnOutcome::Played { audio_ref } => {
                info!(call_id = %self.call_id, turn_id, media = %audio_ref, fallbacks = fallbacks.len(), "turn played")
            }
            TurnOutcome::Cancelled => info!(call_id = %self.call_id, turn_id, "turn cancelled"),
            TurnOutcome::Failed(e) => warn!(call_id = %self.call_id, turn_id, error = %e, "turn failed"),
        }
        TurnReport {
            turn_id,
            outcome,
            fallbacks,
        }
    }

    async fn execute(
        &self,
        turn_id: u64,
        input: TurnInput,
        deadline: Instant,
        cancel: &CancellationToken,
        fallbacks: &mut Vec<FallbackReason>,
    ) -> TurnOutcome {
        let text = match input {
            TurnInput::Greeting(text) => {
                let mut conv = self.conversation.lock().await;
                if cancel.is_cancelled() {
                    return TurnOutcome::Cancelled;
                }
                conv.record_bot(&text);
                text
            }
            TurnInput::Utterance(clip) => {
                if cancel.is_cancelled() {
                    return TurnOutcome::Cancelled;
                }
                match self.transcribe(&clip, deadline, cancel).await {
                    StepOutcome::Success(heard) => {
                        match self.converse(&heard, deadline, cancel, fallbacks).await {
                            Some(answer) => answer,
                            None => return TurnOutcome::Cancelled,
                        }
                    }
                    StepOutcome::Fallback(reprompt, reason) => {
                        fallbacks.push(reason);
                        let mut conv = self.conversation.lock().await;
                        if cancel.is_cancelled() {
                            return TurnOutcome::Cancelled;
                        }
                        conv.record_bot(&reprompt);
                        reprompt
                    }
                    StepOutcome::Fatal(_) => return TurnOutcome::Cancelled,
                }
            }
        };

        if cancel.is_cancelled() {
            return TurnOutcome::Cancelled;
        }
        let audio_ref = match self.synthesize(&text, deadline, cancel).await {
            StepOutcome::Success(r) => r,
            StepOutcome::Fallback(r, reason) => {
                fallbacks.push(reason);
                r
            }
            StepOutcome::Fatal(_) => return TurnOutcome::Cancelled,
        };

        match self.play(turn_id, &audio_ref, cancel).await {
            StepOutcome::Success(()) | StepOutcome::Fallback((), _) => TurnOutcome::Played { audio_ref },
            StepOutcome::Fatal(VoiceError::Cancelled) => TurnOutcome::Cancelled,
            StepOutcome::Fatal(e) => TurnOutcome::Failed(e.to_string()),
        }
    }

    /// Steps 2–5: record the client, ask the LLM, apply the directive, record the answer.
    /// `None` when cancelled.
    async fn converse(
        &self,
        heard: &str,
        deadline: Instant,
        cancel: &CancellationToken,
        fallbacks: &mut Vec<FallbackReason>,
    ) -> Option<String> {
        let view = {
            let mut conv = self.conversation.lock().await;
            if cancel.is_cancelled() {
                return None;
            }
            conv.record_client(heard);
            conv.llm_view(self.policy.history_window)
        };

        let reply = match self.think(&view, deadline, cancel).await {
            StepOutcome::Success(reply) => reply,
            StepOutcome::Fallback(reply, reason) => {
                fallbacks.push(reason);
                reply
            }
            StepOutcome::Fatal(e) => {
                debug!(call_id = %self.call_id, error = %e, "LLM call abandoned");
                return None;
            }
        };
        debug!(call_id = %self.call_id, reasoning = %reply.reasoning, "LLM reasoning");

        let mut conv = self.conversation.lock().await;
        if cancel.is_cancelled() {
            return None;
        }
        self.apply_system_info(&mut conv.profile, &reply.system_info);
        conv.record_bot(&reply.answer);
        Some(reply.answer)
    }

    async fn transcribe(&self, clip: &AudioClip, deadline: Instant, cancel: &CancellationToken) -> StepOutcome<String> {
        let reprompt = || self.policy.reprompt_text.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => return StepOutcome::Fatal(VoiceError::Cancelled),
            r = timeout_at(deadline, self.caps.stt.transcribe(clip)) => r,
        };
        match result {
            Ok(Ok(text)) if !text.trim().is_empty() => StepOutcome::Success(text.trim().to_string()),
            Ok(Ok(_)) => {
                debug!(call_id = %self.call_id, "empty transcript, re-prompting");
                StepOutcome::Fallback(reprompt(), FallbackReason::EmptyTranscript)
            }
            Ok(Err(e)) => {
                warn!(call_id = %self.call_id, error = %e, "STT failed, re-prompting");
                StepOutcome::Fallback(reprompt(), FallbackReason::SttFailed)
            }
            Err(_) => {
                warn!(call_id = %self.call_id, "STT exceeded turn deadline");
                StepOutcome::Fallback(reprompt(), FallbackReason::DeadlineExceeded)
            }
        }
    }

    async fn think(&self, view: &[ChatMessage], deadline: Instant, cancel: &CancellationToken) -> StepOutcome<LlmReply> {
        let result = tokio::select! {
            _ = cancel.cancelled() => return StepOutcome::Fatal(VoiceError::Cancelled),
            r = timeout_at(deadline, self.caps.llm.generate(view)) => r,
        };
        match result {
            Ok(Ok(reply)) => StepOutcome::Success(reply),
            Ok(Err(VoiceError::MalformedReply { reason, raw })) => {
                warn!(call_id = %self.call_id, reason = %reason, raw = %raw, "malformed LLM reply");
                StepOutcome::Fallback(self.fallback_reply(), FallbackReason::LlmMalformed)
            }
            Ok(Err(e)) => {
                warn!(call_id = %self.call_id, error = %e, "LLM unavailable");
                StepOutcome::Fallback(self.fallback_reply(), FallbackReason::LlmUnavailable)
            }
            Err(_) => {
                warn!(call_id = %self.call_id, "LLM exceeded turn deadline");
                StepOutcome::Fallback(self.fallback_reply(), FallbackReason::DeadlineExceeded)
            }
        }
    }

    async fn synthesize(&self, text: &str, deadline: Instant, cancel: &CancellationToken) -> StepOutcome<String> {
        let prepared = self.policy.pronunciation.prepare_for_tts(text);
        let fallback = || self.policy.fallback_audio.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => return StepOutcome::Fatal(VoiceError::Cancelled),
            r = timeout_at(deadline, self.caps.tts.synthesize(&prepared)) => r,
        };
        match result {
            Ok(Ok(audio_ref)) => StepOutcome::Success(audio_ref),
            Ok(Err(e)) => {
                warn!(call_id = %self.call_id, error = %e, "TTS failed, playing fallback media");
                StepOutcome::Fallback(fallback(), FallbackReason::TtsFailed)
            }
            Err(_) => {
                warn!(call_id = %self.call_id, "TTS exceeded turn deadline");
                StepOutcome::Fallback(fallback(), FallbackReason::DeadlineExceeded)
            }
        }
    }

    async fn play(&self, turn_id: u64, audio_ref: &str, cancel: &CancellationToken) -> StepOutcome<()> {
        let mut slot = self.gate.lock().await;
        if cancel.is_cancelled() {
            return StepOutcome::Fatal(VoiceError::Cancelled);
        }
        let command = self.caps.telephony.play(&self.call_id, audio_ref);
        match timeout(self.policy.command_timeout, command).await {
            Ok(Ok(playback_id)) => {
                debug!(call_id = %self.call_id, turn_id, playback_id = %playback_id, "playing");
                slot.start(turn_id, playback_id);
                StepOutcome::Success(())
            }
            Ok(Err(e)) => StepOutcome::Fatal(e),
            Err(_) => StepOutcome::Fatal(VoiceError::Timeout("play")),
        }
    }

    fn fallback_reply(&self) -> LlmReply {
        LlmReply {
            reasoning: String::new(),
            answer: self.policy.fallback_text.clone(),
            system_info: String::new(),
        }
    }

    fn apply_system_info(&self, profile: &mut CallProfile, system_info: &str) {
        for directive in parse_system_info(system_info) {
            match directive {
                DirectiveParse::Update { field, value } => {
                    profile.set_field(field, &value, &self.policy.cities);
                    info!(call_id = %self.call_id, field = %field, value = %value, "profile updated");
                }
                DirectiveParse::UnrecognizedField(label) => {
                    warn!(call_id = %self.call_id, field = %label, "unrecognized profile field dropped");
                }
                DirectiveParse::Malformed(text) => {
                    warn!(call_id = %self.call_id, text = %text, "unparseable system_info line dropped");
                }
                DirectiveParse::Empty => {}
            }
        }
    }
}
