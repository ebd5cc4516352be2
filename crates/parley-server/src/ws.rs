//! WebSocket connection layer.
//!
//! One socket is one relay connection. Text frames carry [`ClientEvent`]
//! JSON; everything the relay queues for the connection is written back by
//! a dedicated writer task that also keeps the socket alive with pings.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use parley_core::ConnectionHandle;
use parley_shared::protocol::{ClientEvent, OperationError, ServerEvent, MAX_FRAME_SIZE};
use tracing::{debug, info, warn};

use crate::api::{AppState, ConnectionSlot};

/// Handle WebSocket upgrade. Enforces the connection cap before accepting.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(slot) = state.try_acquire_connection() else {
        warn!(
            max = state.config.max_connections,
            "Connection rejected: limit reached"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| run_session(socket, state, slot))
        .into_response()
}

async fn run_session(socket: WebSocket, state: AppState, _slot: ConnectionSlot) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn, mut rx) = state.relay.open_connection(state.config.outbound_buffer);

    info!(conn = %conn.id(), "WebSocket connected");

    let ping_every = Duration::from_secs(state.config.ws_ping_interval_secs);
    let writer = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(ping_every);
        ping_ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, event = event.name(), "Failed to encode event");
                            continue;
                        }
                    };
                    if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping_ticker.tick() => {
                    if ws_sender.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => handle_frame(&state, &conn, &text).await,
            Ok(WsMessage::Binary(_)) => debug!(conn = %conn.id(), "Ignoring binary frame"),
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => {}
            Err(e) => {
                debug!(conn = %conn.id(), error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.relay.disconnect(conn.id());
    state.event_limiter.forget(&conn.id()).await;
    writer.abort();

    info!(conn = %conn.id(), "WebSocket closed");
}

async fn handle_frame(state: &AppState, conn: &ConnectionHandle, text: &str) {
    let event = match decode_frame(text) {
        Ok(event) => event,
        Err(reply) => {
            conn.send(reply);
            return;
        }
    };

    if !state.event_limiter.check(conn.id()).await {
        warn!(conn = %conn.id(), event = event.name(), "Event rate limit exceeded");
        conn.send(error_event(event.name(), "Rate limit exceeded"));
        return;
    }

    state.relay.handle_event(conn, event).await;
}

/// Decode one text frame, or build the `error` event to answer it with.
fn decode_frame(text: &str) -> Result<ClientEvent, ServerEvent> {
    ClientEvent::from_json(text).map_err(|e| error_event("decode", &e.to_string()))
}

fn error_event(operation: &str, error: &str) -> ServerEvent {
    ServerEvent::Error(OperationError {
        operation: operation.to_string(),
        error: error.to_string(),
    })
}
