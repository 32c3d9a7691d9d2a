//! A single-participant room carried over one client WebSocket.
//!
//! The socket reader feeds client messages into [`WsRoom::apply`] and audio frames into
//! [`WsRoom::push_audio`]; the interview job consumes the room through the core `Room`
//! and `Participant` traits. Everything sent back to the client goes through one outbound
//! channel drained by the socket writer.

use super::protocol::{ClientMessage, ServerMessage};
use crate::audio_utils;
use async_trait::async_trait;
use bytes::Bytes;
use narra_core::transport::{Participant, Room, TrackKind, Transcription, TransportError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

const AUDIO_BUFFER: usize = 256;

#[derive(Clone)]
enum Lobby {
    Waiting,
    Joined(Arc<WsParticipant>),
    Closed,
}

pub struct WsRoom {
    name: String,
    outbound: mpsc::Sender<ServerMessage>,
    lobby: watch::Sender<Lobby>,
}

impl WsRoom {
    pub fn new(name: impl Into<String>, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let (lobby, _) = watch::channel(Lobby::Waiting);
        Self {
            name: name.into(),
            outbound,
            lobby,
        }
    }

    fn participant(&self) -> Option<Arc<WsParticipant>> {
        match &*self.lobby.borrow() {
            Lobby::Joined(participant) => Some(participant.clone()),
            _ => None,
        }
    }

    /// Applies one client message. Returns `false` once the client has left.
    pub async fn apply(&self, message: ClientMessage) -> bool {
        match message {
            ClientMessage::Join { identity } => {
                self.join(identity).await;
                true
            }
            ClientMessage::PublishTrack { kind } => {
                self.set_track(kind, true).await;
                true
            }
            ClientMessage::UnpublishTrack { kind } => {
                self.set_track(kind, false).await;
                true
            }
            ClientMessage::Leave => false,
        }
    }

    async fn join(&self, identity: String) {
        let identity = identity.trim().to_string();
        if identity.is_empty() {
            self.reply(ServerMessage::error("identity must not be empty"))
                .await;
            return;
        }
        if !matches!(*self.lobby.borrow(), Lobby::Waiting) {
            self.reply(ServerMessage::error("already joined")).await;
            return;
        }

        // `joined` goes out before the job can see the participant.
        self.reply(ServerMessage::Joined {
            room: self.name.clone(),
        })
        .await;
        let participant = Arc::new(WsParticipant::new(identity, self.outbound.clone()));
        self.lobby.send_replace(Lobby::Joined(participant));
    }

    async fn set_track(&self, kind: TrackKind, published: bool) {
        match self.participant() {
            Some(participant) => participant.set_track(kind, published),
            None => self.reply(ServerMessage::error("join the room first")).await,
        }
    }

    /// Forwards a microphone frame. Frames are dropped while no audio track is published.
    pub fn push_audio(&self, frame: Bytes) {
        if let Some(participant) = self.participant() {
            participant.push_audio(frame);
        }
    }

    /// Marks the connection gone: a waiting job fails and a joined participant leaves.
    pub fn close(&self) {
        match self.participant() {
            Some(participant) => participant.leave(),
            None => {
                self.lobby.send_replace(Lobby::Closed);
            }
        }
    }

    async fn reply(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!("Client writer is gone; dropping message.");
        }
    }
}

#[async_trait]
impl Room for WsRoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.outbound.is_closed() || matches!(*self.lobby.borrow(), Lobby::Closed) {
            return Err(TransportError::Connect("client connection closed".to_string()));
        }
        Ok(())
    }

    async fn wait_for_participant(&self) -> Result<Arc<dyn Participant>, TransportError> {
        let mut lobby = self.lobby.subscribe();
        let state = lobby
            .wait_for(|state| !matches!(state, Lobby::Waiting))
            .await
            .map(|state| state.clone())
            .map_err(|_| TransportError::Disconnected)?;

        match state {
            Lobby::Joined(participant) => Ok(participant),
            _ => Err(TransportError::Disconnected),
        }
    }
}

/// The remote participant on the other end of the socket.
pub struct WsParticipant {
    identity: String,
    outbound: mpsc::Sender<ServerMessage>,
    tracks: watch::Sender<HashSet<TrackKind>>,
    audio: broadcast::Sender<Bytes>,
    finals_tx: mpsc::UnboundedSender<Transcription>,
    finals_rx: Mutex<mpsc::UnboundedReceiver<Transcription>>,
    gone: watch::Sender<bool>,
}

impl WsParticipant {
    fn new(identity: String, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let (tracks, _) = watch::channel(HashSet::new());
        let (audio, _) = broadcast::channel(AUDIO_BUFFER);
        let (finals_tx, finals_rx) = mpsc::unbounded_channel();
        let (gone, _) = watch::channel(false);
        Self {
            identity,
            outbound,
            tracks,
            audio,
            finals_tx,
            finals_rx: Mutex::new(finals_rx),
            gone,
        }
    }

    fn set_track(&self, kind: TrackKind, published: bool) {
        let changed = self.tracks.send_if_modified(|tracks| {
            if published {
                tracks.insert(kind)
            } else {
                tracks.remove(&kind)
            }
        });
        if changed {
            info!(identity = %self.identity, ?kind, published, "Track changed");
        }
    }

    fn push_audio(&self, frame: Bytes) {
        if !self.has_track(TrackKind::Audio) {
            return;
        }
        if !audio_utils::is_pcm16_aligned(&frame) {
            warn!(identity = %self.identity, len = frame.len(), "Dropping misaligned PCM16 frame");
            return;
        }
        // No subscriber yet means no model session; the frame is simply not heard.
        let _ = self.audio.send(frame);
    }

    fn leave(&self) {
        if !self.gone.send_replace(true) {
            info!(identity = %self.identity, "Participant left");
        }
    }

    async fn wait_gone(&self) {
        let mut gone = self.gone.subscribe();
        let _ = gone.wait_for(|gone| *gone).await;
    }

    async fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait]
impl Participant for WsParticipant {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.borrow().contains(&kind)
    }

    async fn wait_for_track(
        &self,
        kind: TrackKind,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut tracks = self.tracks.subscribe();
        let published = async move {
            tracks
                .wait_for(|tracks| tracks.contains(&kind))
                .await
                .map(|_| ())
        };
        match tokio::time::timeout(timeout, published).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => Err(TransportError::TrackTimeout(timeout, kind)),
        }
    }

    async fn wait_for_transcription(&self) -> Result<Transcription, TransportError> {
        let mut finals = self.finals_rx.lock().await;
        tokio::select! {
            segment = finals.recv() => segment.ok_or(TransportError::Disconnected),
            _ = self.wait_gone() => Err(TransportError::Disconnected),
        }
    }

    async fn disconnected(&self) {
        self.wait_gone().await
    }

    fn subscribe_audio(&self) -> broadcast::Receiver<Bytes> {
        self.audio.subscribe()
    }

    async fn publish_audio(&self, chunk: String) -> Result<(), TransportError> {
        self.send(ServerMessage::AudioChunk { data: chunk }).await
    }

    async fn publish_transcription(&self, segment: Transcription) -> Result<(), TransportError> {
        if segment.is_final {
            let _ = self.finals_tx.send(segment.clone());
        }
        self.send(ServerMessage::Transcription {
            text: segment.text,
            is_final: segment.is_final,
        })
        .await
    }
}
