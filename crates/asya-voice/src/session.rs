//! **Call session**: the per-call state machine.
//!
//! ```text
//! Idle ──speech-started──▶ Listening ──speech-finished / trailing silence──▶ Thinking ──played──▶ Speaking
//!  ▲                          │ (trivial audio)              │                   │
//!  └──────────────────────────┘◀──────failed / finished──────┴───────────────────┘
//!                      Thinking / Speaking ──speech-started──▶ Interrupted ──speech-finished──▶ Thinking
//! any state ──call-ended──▶ Terminated (one commit)
//! ```
//!
//! A session runs as its own task (see [`SessionRegistry`](crate::SessionRegistry)); the turn
//! pipeline runs in a further task per turn and reports back over a channel, so the session
//! keeps reacting to events while a turn is in flight.
//!
//! Speech boundaries come from the PBX events or, failing those, from the local VAD: voiced audio
//! opens an utterance and `end_of_speech` of unbroken silence after it closes one.

use crate::audio::AudioBuffer;
use crate::events::CallEvent;
use crate::interrupt::InterruptController;
use crate::policy::{Capabilities, DialogPolicy};
use crate::turn::{TurnInput, TurnOutcome, TurnPipeline, TurnReport};
use crate::vad::VoiceActivityDetector;
use asya_core::{normalize_phone, CallRecord, CallStats, CallStore, Conversation, ProfileField};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Interrupted,
    Terminated,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Listening => "listening",
            CallState::Thinking => "thinking",
            CallState::Speaking => "speaking",
            CallState::Interrupted => "interrupted",
            CallState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Call records whose commit failed, by call id.
pub type UnsavedCalls = Arc<DashMap<String, CallRecord>>;

/// Everything a session borrows from the process.
#[derive(Clone)]
pub struct SessionDeps {
    pub caps: Capabilities,
    pub policy: Arc<DialogPolicy>,
    pub store: Arc<dyn CallStore>,
    pub vad: Arc<dyn VoiceActivityDetector>,
    pub unsaved: UnsavedCalls,
}

pub struct CallSession {
    call_id: String,
    caller_number: String,
    started_at: DateTime<Utc>,
    state: CallState,
    state_tx: watch::Sender<CallState>,
    buffer: AudioBuffer,
    /// Voiced audio seen in the open utterance.
    heard_voice: bool,
    trailing_silence: Duration,
    conversation: Arc<Mutex<Conversation>>,
    pipeline: TurnPipeline,
    interrupt: InterruptController,
    deps: SessionDeps,
    next_turn: u64,
    in_flight: Option<u64>,
    reports_tx: mpsc::UnboundedSender<TurnReport>,
    reports_rx: mpsc::UnboundedReceiver<TurnReport>,
    stats: CallStats,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, caller_number: impl Into<String>, deps: SessionDeps) -> Self {
        let call_id = call_id.into();
        let conversation = Arc::new(Mutex::new(Conversation::new(deps.policy.system_prompt.clone())));
        let interrupt = InterruptController::new(
            call_id.clone(),
            Arc::clone(&deps.caps.telephony),
            deps.policy.command_timeout,
        );
        let pipeline = TurnPipeline::new(
            call_id.clone(),
            deps.caps.clone(),
            Arc::clone(&deps.policy),
            Arc::clone(&conversation),
            interrupt.gate(),
        );
        let (state_tx, _) = watch::channel(CallState::Idle);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            call_id,
            caller_number: caller_number.into(),
            started_at: Utc::now(),
            state: CallState::Idle,
            state_tx,
            buffer: AudioBuffer::new(deps.policy.sample_rate),
            heard_voice: false,
            trailing_silence: Duration::ZERO,
            conversation,
            pipeline,
            interrupt,
            deps,
            next_turn: 1,
            in_flight: None,
            reports_tx,
            reports_rx,
            stats: CallStats::default(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    pub fn conversation(&self) -> Arc<Mutex<Conversation>> {
        Arc::clone(&self.conversation)
    }

    pub fn stats(&self) -> CallStats {
        self.stats
    }

    fn set_state(&mut self, next: CallState) {
        if self.state != next {
            debug!(call_id = %self.call_id, from = %self.state, to = %next, "state");
        }
        self.state = next;
        self.state_tx.send_replace(next);
    }

    /// Caller lookup, recording and the optional greeting.
    pub async fn on_call_start(&mut self) {
        let known = match self.deps.store.find_client(&self.caller_number).await {
            Ok(found) => found,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "client lookup failed");
                None
            }
        };
        {
            let mut conv = self.conversation.lock().await;
            let profile = &mut conv.profile;
            profile.phone = normalize_phone(&self.caller_number);
            if let Some(client) = known {
                info!(
                    call_id = %self.call_id,
                    client_id = %client.client_id,
                    previous_calls = client.call_count,
                    "repeat caller"
                );
                profile.is_repeat_call = true;
                profile.client_id = Some(client.client_id);
                profile.name = client.name;
                profile.organization = client.organization;
                if let Some(city) = client.city {
                    profile.set_field(ProfileField::City, &city, &self.deps.policy.cities);
                }
            }
        }

        let recording = self.deps.caps.telephony.start_recording(&self.call_id);
        match tokio::time::timeout(self.deps.policy.command_timeout, recording).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(call_id = %self.call_id, error = %e, "start_recording failed"),
            Err(_) => warn!(call_id = %self.call_id, "start_recording timed out"),
        }

        if let Some(greeting) = self.deps.policy.greeting_text.clone() {
            self.start_turn(TurnInput::Greeting(greeting));
        }
    }

    pub async fn handle_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::CallStart { .. } => {
                warn!(call_id = %self.call_id, "call-start for a live session ignored");
            }
            CallEvent::SpeechStarted { .. } => self.on_speech_started().await,
            CallEvent::SpeechFinished { .. } => self.on_speech_stopped(),
            CallEvent::PlaybackFinished { playback_id, .. } => {
                self.on_playback_finished(&playback_id).await
            }
            CallEvent::Audio { samples, .. } => self.on_audio(&samples).await,
            CallEvent::CallEnded { .. } => {
                self.on_call_ended().await;
            }
        }
    }

    pub async fn on_speech_started(&mut self) {
        self.reset_silence();
        match self.state {
            CallState::Speaking | CallState::Thinking => {
                self.interrupt.notify_speech_while_speaking(&mut self.buffer).await;
                self.in_flight = None;
                self.stats.interruptions += 1;
                self.set_state(CallState::Interrupted);
            }
            CallState::Idle => {
                self.buffer.clear();
                self.set_state(CallState::Listening);
            }
            CallState::Listening | CallState::Interrupted | CallState::Terminated => {}
        }
    }

    pub fn on_speech_stopped(&mut self) {
        match self.state {
            CallState::Listening | CallState::Interrupted => {
                self.reset_silence();
                if self.buffer.is_trivial(self.deps.policy.min_utterance) {
                    debug!(
                        call_id = %self.call_id,
                        samples = self.buffer.len(),
                        "utterance too short, ignored"
                    );
                    self.buffer.clear();
                    self.set_state(CallState::Idle);
                } else {
                    let clip = self.buffer.take_clip();
                    self.stats.turns += 1;
                    self.start_turn(TurnInput::Utterance(clip));
                }
            }
            other => debug!(call_id = %self.call_id, state = %other, "speech-finished ignored"),
        }
    }

    /// Caller PCM. Buffered while listening, where enough trailing silence closes the utterance;
    /// elsewhere the local VAD may open a new one.
    pub async fn on_audio(&mut self, samples: &[i16]) {
        match self.state {
            CallState::Listening | CallState::Interrupted => {
                self.buffer.push(samples);
                if self.deps.vad.detect_speech(samples) {
                    self.heard_voice = true;
                    self.trailing_silence = Duration::ZERO;
                } else if self.heard_voice {
                    let rate = self.deps.policy.sample_rate.max(1) as f64;
                    self.trailing_silence += Duration::from_secs_f64(samples.len() as f64 / rate);
                    if self.trailing_silence >= self.deps.policy.end_of_speech {
                        debug!(
                            call_id = %self.call_id,
                            silence_ms = self.trailing_silence.as_millis() as u64,
                            "end of speech detected locally"
                        );
                        self.on_speech_stopped();
                    }
                }
            }
            CallState::Terminated => {}
            CallState::Idle | CallState::Thinking | CallState::Speaking => {
                if self.deps.vad.detect_speech(samples) {
                    self.on_speech_started().await;
                    self.buffer.push(samples);
                    self.heard_voice = true;
                }
            }
        }
    }

    /// Media finished on the PBX. Only the playback this session is tracking ends Speaking; a
    /// late report for media already stopped by a barge-in is dropped.
    pub async fn on_playback_finished(&mut self, playback_id: &str) {
        match self.interrupt.gate().finish(playback_id).await {
            Some(turn_id) => {
                debug!(call_id = %self.call_id, turn_id, playback_id, "playback finished");
                if self.state == CallState::Speaking {
                    self.set_state(CallState::Idle);
                }
            }
            None => {
                debug!(call_id = %self.call_id, playback_id, "playback-finished for untracked media ignored")
            }
        }
    }

    pub async fn on_turn_report(&mut self, report: TurnReport) {
        self.stats.fallbacks += report.fallbacks.len() as u32;
        if self.in_flight != Some(report.turn_id) {
            debug!(call_id = %self.call_id, turn_id = report.turn_id, "stale turn report");
            return;
        }
        self.in_flight = None;
        if self.state == CallState::Terminated {
            return;
        }
        match report.outcome {
            TurnOutcome::Played { .. } => {
                // Playback may already have finished before the report arrived.
                if self.interrupt.gate().active().await == Some(report.turn_id) {
                    self.set_state(CallState::Speaking);
                } else {
                    self.set_state(CallState::Idle);
                }
            }
            TurnOutcome::Cancelled => self.set_state(CallState::Idle),
            TurnOutcome::Failed(_) => {
                self.stats.failed_turns += 1;
                self.set_state(CallState::Idle);
            }
        }
    }

    /// Wait until no turn is in flight.
    pub async fn settle(&mut self) {
        while self.in_flight.is_some() {
            match self.reports_rx.recv().await {
                Some(report) => self.on_turn_report(report).await,
                None => break,
            }
        }
    }

    /// Terminate and persist. Idempotent: only the first call commits. Returns the record id.
    pub async fn on_call_ended(&mut self) -> Option<String> {
        if self.state == CallState::Terminated {
            debug!(call_id = %self.call_id, "call already finalized");
            return None;
        }
        self.set_state(CallState::Terminated);
        self.interrupt.cancel();
        self.in_flight = None;
        self.buffer.clear();
        self.reset_silence();
        self.deps.caps.telephony.release(&self.call_id);

        let record = {
            let conv = self.conversation.lock().await;
            CallRecord {
                call_id: self.call_id.clone(),
                caller_number: self.caller_number.clone(),
                started_at: self.started_at,
                ended_at: Utc::now(),
                profile: conv.profile.clone(),
                transcript: conv.transcript().to_vec(),
                history: conv.history().to_vec(),
                stats: self.stats,
            }
        };
        match self.deps.store.commit_call(&record).await {
            Ok(record_id) => {
                info!(
                    call_id = %self.call_id,
                    record_id = %record_id,
                    turns = self.stats.turns,
                    "call finalized"
                );
                Some(record_id)
            }
            Err(e) => {
                error!(call_id = %self.call_id, error = %e, "call commit failed, record kept for retry");
                self.deps.unsaved.insert(self.call_id.clone(), record);
                None
            }
        }
    }

    fn reset_silence(&mut self) {
        self.heard_voice = false;
        self.trailing_silence = Duration::ZERO;
    }

    fn start_turn(&mut self, input: TurnInput) {
        let turn_id = self.next_turn;
        self.next_turn += 1;
        self.in_flight = Some(turn_id);
        self.set_state(CallState::Thinking);

        let pipeline = self.pipeline.clone();
        let cancel = self.interrupt.turn_token();
        let reports = self.reports_tx.clone();
        tokio::spawn(async move {
            let report = pipeline.run(turn_id, input, cancel).await;
            let _ = reports.send(report);
        });
    }

    /// Actor loop: events and turn reports until the call terminates.
    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<CallEvent>) {
        self.on_call_start().await;
        loop {
            enum Next {
                Event(CallEvent),
                Report(TurnReport),
                Closed,
            }

            let next = tokio::select! {
                event = events.recv() => match event {
                    Some(e) => Next::Event(e),
                    None => Next::Closed,
                },
                Some(report) = self.reports_rx.recv() => Next::Report(report),
            };

            match next {
                Next::Event(event) => self.handle_event(event).await,
                Next::Report(report) => self.on_turn_report(report).await,
                Next::Closed => {
                    self.on_call_ended().await;
                }
            }
            if self.state == CallState::Terminated {
                break;
            }
        }
    }
}
