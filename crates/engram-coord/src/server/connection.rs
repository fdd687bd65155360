//! WebSocket transport.
//!
//! One text frame carries one envelope. Frames are decoded here; a parse
//! failure (malformed JSON or unknown discriminant) answers with an
//! INVALID_MESSAGE error and closes the connection. Decoded envelopes
//! re-enter the actor, which owns all state.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::ServerState;
use crate::protocol::{
    Envelope, ErrorCode, ErrorPayload, MessageType, decode_envelope,
};

/// WebSocket upgrade handler — GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let Some(mut conn) = state.handle.connect().await else {
        return;
    };
    let (mut sender, mut receiver) = socket.split();
    debug!(conn_id = conn.conn_id(), "websocket connected");

    loop {
        tokio::select! {
            // Actor → client
            outbound = conn.recv() => {
                match outbound {
                    Some(envelope) => {
                        if sender
                            .send(Message::Text(envelope.encode().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    // The actor dropped this connection
                    None => break,
                }
            }
            // Client → actor
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match decode_envelope(&text) {
                        Ok(envelope) => conn.send(envelope),
                        Err(e) => {
                            warn!(conn_id = conn.conn_id(), "undecodable frame: {e}");
                            let error = Envelope::new(
                                "server",
                                MessageType::Error,
                                &ErrorPayload::new(ErrorCode::InvalidMessage, e.to_string()),
                            );
                            let _ = sender.send(Message::Text(error.encode().into())).await;
                            break;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id = conn.conn_id(), "websocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    conn.close();
    debug!(conn_id = conn.conn_id(), "websocket disconnected");
}
