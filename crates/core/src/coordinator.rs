//! Turn Coordinator
//!
//! Drives one live interview: wait for the participant's microphone, start the model
//! (which speaks first), then alternate between listening for a finished utterance and
//! dispatching the agent's reply until the participant leaves or the model closes the
//! interview.

use crate::{
    model::{ConversationalModel, ModelError, ModelSession, SessionControl},
    session::ModelOptions,
    transcript::{TranscriptLog, TranscriptRecord},
    transport::{Participant, TrackKind, TransportError},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingAudioTrack,
    ModelStarting,
    Listening,
    Replying,
    Ended,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum EndReason {
    /// No audio track appeared before the timeout.
    NoAudio,
    Disconnected,
    /// The model integration called `end_session`.
    EndRequested,
    TransportError(String),
    ModelError(String),
}

impl EndReason {
    /// The `reason` tag this value serializes with.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::NoAudio => "no_audio",
            EndReason::Disconnected => "disconnected",
            EndReason::EndRequested => "end_requested",
            EndReason::TransportError(_) => "transport_error",
            EndReason::ModelError(_) => "model_error",
        }
    }
}

/// What "asked" means when progress is persisted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarkPolicy {
    /// Only questions the model reports as put to the participant.
    #[default]
    Presented,
    /// Every remaining question, as soon as the model session starts.
    WholeSession,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub audio_track_timeout: Duration,
    /// Failed turns in a row tolerated before the session is given up.
    pub max_consecutive_turn_errors: usize,
    pub mark_policy: MarkPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            audio_track_timeout: Duration::from_secs(10),
            max_consecutive_turn_errors: 5,
            mark_policy: MarkPolicy::Presented,
        }
    }
}

/// Result of a coordinator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Every state visited, in order, ending with `Ended`.
    pub history: Vec<TurnState>,
    pub end_reason: EndReason,
    /// Completed participant-utterance-then-reply cycles.
    pub turns: usize,
    /// Questions to record as asked, in interview order.
    pub presented: Vec<String>,
}

impl TurnOutcome {
    pub fn reached(&self, state: TurnState) -> bool {
        self.history.contains(&state)
    }
}

pub struct TurnCoordinator {
    participant: Arc<dyn Participant>,
    model: Arc<dyn ConversationalModel>,
    transcripts: Option<Arc<dyn TranscriptLog>>,
    config: CoordinatorConfig,
    state: TurnState,
    history: Vec<TurnState>,
    turns: usize,
}

impl TurnCoordinator {
    pub fn new(
        participant: Arc<dyn Participant>,
        model: Arc<dyn ConversationalModel>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            participant,
            model,
            transcripts: None,
            config,
            state: TurnState::Idle,
            history: vec![TurnState::Idle],
            turns: 0,
        }
    }

    pub fn with_transcripts(mut self, transcripts: Option<Arc<dyn TranscriptLog>>) -> Self {
        self.transcripts = transcripts;
        self
    }

    /// Runs the session to completion. Never fails; the reason it stopped is reported in
    /// the outcome.
    pub async fn run(mut self, options: ModelOptions, control: SessionControl) -> TurnOutcome {
        let end_reason = self.drive(options, &control).await;
        self.transition(TurnState::Ended);
        info!(identity = %self.participant.identity(), reason = ?end_reason, turns = self.turns, "Interview session ended");

        TurnOutcome {
            history: self.history,
            end_reason,
            turns: self.turns,
            presented: control.presented(),
        }
    }

    fn transition(&mut self, next: TurnState) {
        debug!(from = ?self.state, to = ?next, "Turn state changed");
        self.state = next;
        self.history.push(next);
    }

    async fn drive(&mut self, options: ModelOptions, control: &SessionControl) -> EndReason {
        if let Err(reason) = self.await_audio_track().await {
            return reason;
        }

        self.transition(TurnState::ModelStarting);
        let mut session = match self.start_model(options, control).await {
            Ok(session) => session,
            Err(reason) => return reason,
        };

        self.transition(TurnState::Listening);
        let reason = self.listen(session.as_mut(), control).await;
        session.close().await;
        reason
    }

    async fn await_audio_track(&mut self) -> Result<(), EndReason> {
        self.transition(TurnState::AwaitingAudioTrack);
        let participant = self.participant.clone();
        if participant.has_track(TrackKind::Audio) {
            return Ok(());
        }

        let timeout = self.config.audio_track_timeout;
        warn!(identity = %participant.identity(), "Participant has no microphone track. Waiting for track...");

        let waited = tokio::select! {
            res = tokio::time::timeout(timeout, participant.wait_for_track(TrackKind::Audio, timeout)) => res,
            _ = participant.disconnected() => {
                info!(identity = %participant.identity(), "Participant left while waiting for audio.");
                return Err(EndReason::Disconnected);
            }
        };

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(TransportError::TrackTimeout(..))) | Err(_) => {
                warn!(identity = %participant.identity(), ?timeout, "No audio track published in time.");
                Err(EndReason::NoAudio)
            }
            Ok(Err(TransportError::Disconnected)) => Err(EndReason::Disconnected),
            Ok(Err(e)) => {
                error!(identity = %participant.identity(), error = %e, "Failed waiting for audio track.");
                Err(EndReason::TransportError(e.to_string()))
            }
        }
    }

    async fn start_model(
        &mut self,
        options: ModelOptions,
        control: &SessionControl,
    ) -> Result<Box<dyn ModelSession>, EndReason> {
        let participant = self.participant.clone();
        info!(identity = %participant.identity(), "Starting conversational model");

        let started = tokio::select! {
            res = self.model.start(options, participant.clone(), control.clone()) => res,
            _ = participant.disconnected() => return Err(EndReason::Disconnected),
        };
        let mut session = started.map_err(|e| {
            error!(identity = %participant.identity(), error = %e, "Failed to start model session.");
            EndReason::ModelError(e.to_string())
        })?;

        if self.config.mark_policy == MarkPolicy::WholeSession {
            control.mark_all_presented();
        }

        // The agent speaks first.
        if let Err(e) = session.generate_reply().await {
            error!(identity = %participant.identity(), error = %e, "Failed to dispatch the opening reply.");
            session.close().await;
            return Err(EndReason::ModelError(e.to_string()));
        }
        Ok(session)
    }

    async fn listen(&mut self, session: &mut dyn ModelSession, control: &SessionControl) -> EndReason {
        let participant = self.participant.clone();
        let mut consecutive_errors = 0usize;

        loop {
            info!(identity = %participant.identity(), "Waiting for participant to speak...");
            let next = tokio::select! {
                biased;
                _ = control.ended() => return EndReason::EndRequested,
                _ = participant.disconnected() => return EndReason::Disconnected,
                _ = session.closed() => {
                    error!(identity = %participant.identity(), "Model session dropped mid-interview.");
                    return EndReason::ModelError(ModelError::Closed.to_string());
                }
                res = participant.wait_for_transcription() => res,
            };

            match next {
                Ok(transcription) if transcription.text.trim().is_empty() => {
                    debug!("Ignoring empty transcription.");
                }
                Ok(transcription) => {
                    info!(identity = %participant.identity(), transcript = %transcription.text, "Received transcript");
                    self.transition(TurnState::Replying);
                    match session.generate_reply().await {
                        Ok(()) => {
                            self.turns += 1;
                            consecutive_errors = 0;
                        }
                        Err(ModelError::Closed) => {
                            error!(identity = %participant.identity(), "Model session closed mid-interview.");
                            return EndReason::ModelError(ModelError::Closed.to_string());
                        }
                        Err(e) => {
                            error!(identity = %participant.identity(), error = %e, "Failed to dispatch reply.");
                            consecutive_errors += 1;
                        }
                    }
                    self.transition(TurnState::Listening);
                    self.log_transcript(&transcription.text);
                }
                Err(TransportError::Disconnected) => return EndReason::Disconnected,
                Err(e) => {
                    error!(identity = %participant.identity(), error = %e, "Error waiting for user input.");
                    consecutive_errors += 1;
                }
            }

            if consecutive_errors >= self.config.max_consecutive_turn_errors {
                error!(identity = %participant.identity(), consecutive_errors, "Too many failed turns. Ending session.");
                return EndReason::TransportError(format!(
                    "{} consecutive failed turns",
                    consecutive_errors
                ));
            }
        }
    }

    /// Writes the utterance to the transcript log in the background, so a slow log never
    /// holds up the conversation.
    fn log_transcript(&self, text: &str) {
        let Some(log) = self.transcripts.clone() else {
            return;
        };
        let record = TranscriptRecord::now(self.participant.identity(), text);
        tokio::spawn(
            async move {
                if let Err(e) = log.save(record).await {
                    warn!(error = %e, "Failed to save transcript.");
                }
            }
            .in_current_span(),
        );
    }
}
