//! WebSocket transport.
//!
//! One socket per connection. A writer task drains the connection's
//! outbound queue; the reader loop dispatches client commands on the core.
//! Errors that invalidate the outbound stream close the socket so the
//! client reconnects and resyncs from history.

use std::sync::Arc;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::StreamExt;
use futures::SinkExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::handlers::AppState;
use super::messages::{ClientMessage, ServerMessage};
use crate::app::ChatCore;
use crate::bus::MessageKind;
use crate::connection::{ConnectionId, OutboundEvent};
use crate::Result;

/// Query parameters for the WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Session token.
    pub token: String,
}

/// Upgrade handler for `GET /ws`.
pub async fn ws_handler(
    State(core): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> std::result::Result<Response, super::error::ApiError> {
    // Reject bad tokens before the upgrade; the connection itself
    // re-validates when it registers.
    core.sessions().validate(&params.token)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(core, socket, params.token)))
}

async fn handle_socket(core: AppState, socket: WebSocket, token: String) {
    let connection = match core.open_connection(&token).await {
        Ok(connection) => connection,
        Err(e) => {
            debug!("Rejected socket after upgrade: {e}");
            return;
        }
    };
    let connection_id = connection.id();

    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(32);

    // Writer: interleaves queued events with direct command replies.
    let writer_connection = Arc::clone(&connection);
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                event = writer_connection.queue().pop() => match event {
                    Some(event) => event_to_message(event),
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };
            let payload = match serde_json::to_string(&message) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(connection = %writer_connection.id(), "Failed to encode event: {e}");
                    continue;
                }
            };
            if sink.send(WsFrame::Text(payload)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection = %connection_id, "Socket error: {e}");
                break;
            }
        };
        let text = match frame {
            WsFrame::Text(text) => text,
            WsFrame::Close(_) => break,
            _ => continue,
        };

        let command = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(command) => command,
            Err(e) => {
                let _ = reply_tx
                    .send(ServerMessage::Error {
                        code: "validation_failed".to_string(),
                        message: format!("malformed message: {e}"),
                    })
                    .await;
                continue;
            }
        };

        match dispatch(&core, connection_id, command, &reply_tx).await {
            Ok(()) => {}
            Err(e) => {
                let closes = e.closes_connection();
                let _ = reply_tx
                    .send(ServerMessage::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    })
                    .await;
                if closes {
                    info!(connection = %connection_id, "Closing connection: {e}");
                    break;
                }
            }
        }
    }

    core.close_connection(connection_id).await;
    writer.abort();
}

async fn dispatch(
    core: &Arc<ChatCore>,
    connection_id: ConnectionId,
    command: ClientMessage,
    reply_tx: &mpsc::Sender<ServerMessage>,
) -> Result<()> {
    match command {
        ClientMessage::Join { room_id, password } => {
            let membership = core
                .join_room(connection_id, room_id, password.as_deref())
                .await?;
            let _ = reply_tx
                .send(ServerMessage::Joined {
                    room_id,
                    role: membership.role,
                })
                .await;
        }
        ClientMessage::Leave { room_id } => {
            core.leave_room(connection_id, room_id).await?;
            let _ = reply_tx.send(ServerMessage::Left { room_id }).await;
        }
        ClientMessage::Post { room_id, content } => {
            // The accepted message comes back through the subscription.
            core.post(connection_id, room_id, content, MessageKind::Text)
                .await?;
        }
        ClientMessage::History {
            room_id,
            after_seq,
            limit,
        } => {
            let messages = core
                .history(connection_id, room_id, after_seq, limit.unwrap_or(50))
                .await?;
            // History rides the outbound queue as a critical event so it
            // cannot reorder against live messages already queued.
            core.connections()
                .send(connection_id, OutboundEvent::History { room_id, messages })?;
        }
        ClientMessage::Typing { room_id, typing } => {
            core.typing(connection_id, room_id, typing).await?;
        }
        ClientMessage::Ping => {
            let _ = reply_tx.send(ServerMessage::Pong).await;
        }
    }
    Ok(())
}

fn event_to_message(event: OutboundEvent) -> ServerMessage {
    match event {
        OutboundEvent::Message(message) => ServerMessage::Message { message },
        OutboundEvent::History { room_id, messages } => {
            ServerMessage::History { room_id, messages }
        }
        OutboundEvent::Presence(snapshot) => ServerMessage::Presence {
            room_id: snapshot.room_id,
            online: snapshot.online.into_iter().collect(),
        },
        OutboundEvent::Typing {
            room_id,
            identity_id,
            typing,
        } => ServerMessage::Typing {
            room_id,
            identity_id,
            typing,
        },
        OutboundEvent::Notice { text } => ServerMessage::Notice { text },
    }
}
