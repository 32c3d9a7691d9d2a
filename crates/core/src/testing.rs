//! In-memory participant and model doubles shared by the coordinator and orchestrator
//! tests.

use crate::{
    model::{ConversationalModel, ModelError, ModelSession, SessionControl},
    session::ModelOptions,
    transport::{Participant, TrackKind, Transcription, TransportError},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast, mpsc, watch};

pub struct FakeParticipant {
    identity: String,
    audio_track: watch::Sender<bool>,
    left: watch::Sender<bool>,
    transcripts_tx: mpsc::UnboundedSender<Result<Transcription, TransportError>>,
    transcripts_rx: Mutex<mpsc::UnboundedReceiver<Result<Transcription, TransportError>>>,
    audio: broadcast::Sender<Bytes>,
    listens: watch::Sender<usize>,
    pub published_audio: StdMutex<Vec<String>>,
}

impl FakeParticipant {
    pub fn new(identity: &str, with_audio: bool) -> Arc<Self> {
        let (transcripts_tx, transcripts_rx) = mpsc::unbounded_channel();
        let (audio, _) = broadcast::channel(16);
        Arc::new(Self {
            identity: identity.to_string(),
            audio_track: watch::channel(with_audio).0,
            left: watch::channel(false).0,
            transcripts_tx,
            transcripts_rx: Mutex::new(transcripts_rx),
            audio,
            listens: watch::channel(0).0,
            published_audio: StdMutex::new(Vec::new()),
        })
    }

    pub fn publish_audio_track(&self) {
        self.audio_track.send_replace(true);
    }

    pub fn say(&self, text: &str) {
        let _ = self.transcripts_tx.send(Ok(Transcription {
            text: text.to_string(),
            is_final: true,
        }));
    }

    pub fn fail_transcription(&self, message: &str) {
        let _ = self
            .transcripts_tx
            .send(Err(TransportError::Other(message.to_string())));
    }

    pub fn leave(&self) {
        self.left.send_replace(true);
    }

    /// Resolves once the coordinator has started waiting for a transcription `n` times.
    pub async fn listened(&self, n: usize) {
        let mut rx = self.listens.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

#[async_trait]
impl Participant for FakeParticipant {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn has_track(&self, kind: TrackKind) -> bool {
        kind == TrackKind::Audio && *self.audio_track.borrow()
    }

    async fn wait_for_track(
        &self,
        kind: TrackKind,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut rx = self.audio_track.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|published| *published)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => Err(TransportError::TrackTimeout(timeout, kind)),
        }
    }

    async fn wait_for_transcription(&self) -> Result<Transcription, TransportError> {
        self.listens.send_modify(|count| *count += 1);
        let mut rx = self.transcripts_rx.lock().await;
        match rx.recv().await {
            Some(result) => result,
            None => Err(TransportError::Disconnected),
        }
    }

    async fn disconnected(&self) {
        let mut rx = self.left.subscribe();
        let _ = rx.wait_for(|left| *left).await;
    }

    fn subscribe_audio(&self) -> broadcast::Receiver<Bytes> {
        self.audio.subscribe()
    }

    async fn publish_audio(&self, chunk: String) -> Result<(), TransportError> {
        if let Ok(mut published) = self.published_audio.lock() {
            published.push(chunk);
        }
        Ok(())
    }

    async fn publish_transcription(&self, segment: Transcription) -> Result<(), TransportError> {
        if segment.is_final {
            let _ = self.transcripts_tx.send(Ok(segment));
        }
        Ok(())
    }
}

/// Scripted model. Replies succeed unless a failure was queued for that call.
#[derive(Default)]
pub struct FakeModel {
    pub starts: AtomicUsize,
    pub replies: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub fail_start: bool,
    pub reply_failures: Arc<StdMutex<VecDeque<Option<ModelError>>>>,
    pub last_options: StdMutex<Option<ModelOptions>>,
    pub last_control: StdMutex<Option<SessionControl>>,
    connection_lost: Arc<Notify>,
}

impl FakeModel {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    /// Queues the outcome of the next reply calls, in order. `None` means success.
    pub fn script_replies(&self, outcomes: Vec<Option<ModelError>>) {
        if let Ok(mut queue) = self.reply_failures.lock() {
            queue.extend(outcomes);
        }
    }

    pub fn control(&self) -> Option<SessionControl> {
        self.last_control.lock().ok().and_then(|c| c.clone())
    }

    /// Drops the running session's connection to the model.
    pub fn lose_connection(&self) {
        self.connection_lost.notify_one();
    }
}

#[async_trait]
impl ConversationalModel for FakeModel {
    async fn start(
        &self,
        options: ModelOptions,
        _participant: Arc<dyn Participant>,
        control: SessionControl,
    ) -> Result<Box<dyn ModelSession>, ModelError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ModelError::Start("refused".to_string()));
        }
        if let Ok(mut last) = self.last_options.lock() {
            *last = Some(options);
        }
        if let Ok(mut last) = self.last_control.lock() {
            *last = Some(control);
        }
        Ok(Box::new(FakeSession {
            replies: self.replies.clone(),
            closes: self.closes.clone(),
            script: self.reply_failures.clone(),
            connection_lost: self.connection_lost.clone(),
        }))
    }
}

struct FakeSession {
    replies: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    script: Arc<StdMutex<VecDeque<Option<ModelError>>>>,
    connection_lost: Arc<Notify>,
}

#[async_trait]
impl ModelSession for FakeSession {
    async fn generate_reply(&mut self) -> Result<(), ModelError> {
        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .flatten();
        match scripted {
            Some(err) => Err(err),
            None => {
                self.replies.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn closed(&self) {
        self.connection_lost.notified().await;
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A room that admits one pre-built participant.
pub struct FakeRoom {
    pub participant: Arc<FakeParticipant>,
    pub refuse_connect: bool,
}

#[async_trait]
impl crate::transport::Room for FakeRoom {
    fn name(&self) -> &str {
        "fake-room"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.refuse_connect {
            return Err(TransportError::Connect("refused".to_string()));
        }
        Ok(())
    }

    async fn wait_for_participant(&self) -> Result<Arc<dyn Participant>, TransportError> {
        Ok(self.participant.clone())
    }
}
