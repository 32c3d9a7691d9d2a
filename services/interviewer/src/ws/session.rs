//! Manages the WebSocket connection lifecycle for one participant.

use super::{
    protocol::{ClientMessage, ServerMessage},
    room::WsRoom,
};
use crate::state::AppState;
use narra_core::orchestrator::JoinOutcome;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

const OUTBOUND_BUFFER: usize = 256;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Runs one connection: a room is opened for it, the interview job runs against that
/// room, and the socket is closed once the job has finished.
#[instrument(name = "ws_connection", skip_all, fields(room))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let room_name = format!("room-{}", Uuid::new_v4());
    tracing::Span::current().record("room", room_name.as_str());
    info!("New WebSocket connection. Awaiting join...");

    let (socket_tx, mut socket_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_outbound(socket_tx, outbound_rx).in_current_span());

    let room = Arc::new(WsRoom::new(room_name, outbound_tx.clone()));
    let mut job = {
        let room = room.clone();
        let orchestrator = state.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_job(room).await }.in_current_span())
    };

    let mut finished = None;
    loop {
        tokio::select! {
            result = &mut job => {
                finished = Some(result);
                break;
            }
            frame = socket_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(message) => {
                        if !room.apply(message).await {
                            info!("Client left the room.");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed client message.");
                        let _ = outbound_tx.send(ServerMessage::error(format!("invalid message: {}", e))).await;
                    }
                },
                Some(Ok(Message::Binary(data))) => room.push_audio(data),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed the connection.");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    error!("Error receiving from client WebSocket: {:?}", e);
                    break;
                }
            }
        }
    }

    room.close();
    let result = match finished {
        Some(result) => result,
        None => job.await,
    };
    match result {
        Ok(outcome) => {
            if let JoinOutcome::Failed(message) = &outcome {
                let _ = outbound_tx.send(ServerMessage::error(message.clone())).await;
            }
            let _ = outbound_tx.send(ServerMessage::session_ended(&outcome)).await;
            info!(?outcome, "Interview job finished.");
        }
        Err(e) => error!(error = ?e, "Interview job panicked."),
    }

    // The writer stops once every sender, including the room's, is gone.
    drop(outbound_tx);
    drop(room);
    let _ = writer.await;
    info!("WebSocket connection closed.");
}

/// Drains outbound messages to the client, then closes the socket.
async fn write_outbound(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = outbound_rx.recv().await {
        if let Err(e) = send_msg(&mut socket_tx, message).await {
            debug!(error = %e, "Client socket closed; stopping writer.");
            return;
        }
    }
    let _ = socket_tx.close().await;
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
