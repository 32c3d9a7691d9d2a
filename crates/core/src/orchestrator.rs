//! Interview Orchestrator
//!
//! Entry point for every participant who joins: works out which questions are left,
//! skips the model entirely when nothing is, otherwise runs a coordinated session and
//! records what was asked.

use crate::{
    coordinator::{CoordinatorConfig, TurnCoordinator, TurnOutcome},
    model::{ConversationalModel, SessionControl},
    progress::{ParticipantProgress, ProgressStore, StoreError},
    question::QuestionBank,
    session::SessionBuilder,
    transcript::TranscriptLog,
    transport::{Participant, Room, TransportError},
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum InterviewError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to a participant who joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Another session for the same identity is still running.
    AlreadyActive,
    /// Every question has been asked already; no session was started.
    Completed,
    /// A session ran and progress was saved.
    Interviewed {
        outcome: TurnOutcome,
        /// Questions newly recorded as asked by this session.
        recorded: usize,
    },
    Failed(String),
}

/// Releases an identity when its session finishes, on every path.
struct ActiveSession<'a> {
    active: &'a StdMutex<HashSet<String>>,
    identity: String,
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.identity);
    }
}

pub struct InterviewOrchestrator {
    store: Arc<dyn ProgressStore>,
    model: Arc<dyn ConversationalModel>,
    bank: QuestionBank,
    builder: SessionBuilder,
    transcripts: Option<Arc<dyn TranscriptLog>>,
    config: CoordinatorConfig,
    active: StdMutex<HashSet<String>>,
    persist_lock: Mutex<()>,
}

impl InterviewOrchestrator {
    pub fn new(store: Arc<dyn ProgressStore>, model: Arc<dyn ConversationalModel>) -> Self {
        Self {
            store,
            model,
            bank: QuestionBank::default(),
            builder: SessionBuilder::new(),
            transcripts: None,
            config: CoordinatorConfig::default(),
            active: StdMutex::new(HashSet::new()),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn with_bank(mut self, bank: QuestionBank) -> Self {
        self.bank = bank;
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transcripts(mut self, transcripts: Arc<dyn TranscriptLog>) -> Self {
        self.transcripts = Some(transcripts);
        self
    }

    pub fn bank(&self) -> &QuestionBank {
        &self.bank
    }

    pub fn transcripts(&self) -> Option<&Arc<dyn TranscriptLog>> {
        self.transcripts.as_ref()
    }

    /// Stored progress for `identity`, empty if it has never been seen.
    pub async fn progress_for(&self, identity: &str) -> ParticipantProgress {
        self.store
            .load()
            .await
            .remove(identity)
            .unwrap_or_default()
    }

    /// Questions still to ask `identity`, in interview order.
    pub async fn remaining_for(&self, identity: &str) -> Vec<String> {
        let progress = self.progress_for(identity).await;
        self.bank.remaining(&progress.asked_questions)
    }

    /// Runs one room: connect, wait for its participant, interview them.
    #[instrument(name = "job", skip_all, fields(room = %room.name()))]
    pub async fn run_job(&self, room: Arc<dyn Room>) -> JoinOutcome {
        info!("Connecting to room");
        let participant = match Self::join_room(room.as_ref()).await {
            Ok(participant) => participant,
            Err(e) => {
                error!(error = %e, "An error occurred while joining the room.");
                return JoinOutcome::Failed(e.to_string());
            }
        };
        self.on_participant_join(participant).await
    }

    async fn join_room(room: &dyn Room) -> Result<Arc<dyn Participant>, InterviewError> {
        room.connect().await?;
        let participant = room.wait_for_participant().await?;
        info!(identity = %participant.identity(), "Participant joined");
        Ok(participant)
    }

    /// Handles a participant joining. Never fails; errors are logged and reported in the
    /// outcome.
    #[instrument(name = "interview", skip_all, fields(identity = %participant.identity()))]
    pub async fn on_participant_join(&self, participant: Arc<dyn Participant>) -> JoinOutcome {
        let identity = participant.identity().to_string();
        let Some(_active) = self.claim(&identity) else {
            warn!("A session for this participant is already running. Refusing a second one.");
            return JoinOutcome::AlreadyActive;
        };

        match self.interview(participant).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Interview failed.");
                JoinOutcome::Failed(e.to_string())
            }
        }
    }

    fn claim(&self, identity: &str) -> Option<ActiveSession<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(identity.to_string()) {
            return None;
        }
        Some(ActiveSession {
            active: &self.active,
            identity: identity.to_string(),
        })
    }

    async fn interview(&self, participant: Arc<dyn Participant>) -> Result<JoinOutcome, InterviewError> {
        let identity = participant.identity().to_string();
        let remaining = self.remaining_for(&identity).await;

        if remaining.is_empty() {
            info!("User has already answered all questions. Ending session.");
            return Ok(JoinOutcome::Completed);
        }

        info!(remaining = remaining.len(), "Starting interview");
        let options = self.builder.options(&remaining);
        let control = SessionControl::new(identity.clone(), remaining);

        let outcome = TurnCoordinator::new(participant, self.model.clone(), self.config.clone())
            .with_transcripts(self.transcripts.clone())
            .run(options, control)
            .await;

        let recorded = self.persist(&identity, &outcome.presented).await?;
        Ok(JoinOutcome::Interviewed { outcome, recorded })
    }

    /// Merges this participant's newly asked questions into the latest stored mapping.
    ///
    /// The store is re-read under a lock so sessions of other participants that finished
    /// in the meantime are not overwritten. If it cannot be read, nothing is saved.
    async fn persist(&self, identity: &str, presented: &[String]) -> Result<usize, StoreError> {
        let _guard = self.persist_lock.lock().await;
        let mut progress = self.store.try_load().await.inspect_err(|e| {
            error!(error = %e, "Could not re-read progress. Not saving over it.");
        })?;

        let entry = progress.entry(identity.to_string()).or_default();
        let recorded = entry.record(presented.iter().cloned());
        let total = entry.asked_questions.len();

        self.store.save(&progress).await?;
        info!(recorded, total, "Saved participant progress");
        Ok(recorded)
    }
}
