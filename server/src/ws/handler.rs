//! WebSocket connection handler.
//!
//! Authenticates the upgrade request, registers the connection and runs the
//! reader loop. Each socket gets one writer task that owns the sink; the
//! registry holds the only sender feeding it. Eviction wakes the reader loop
//! directly, and a writer stuck on a stalled peer is aborted after
//! [`CLOSE_GRACE`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{close_code, Connection, ConnectionId, Outbound};
use super::messages::{ClientMessage, ProtocolError, ServerMessage};
use super::registry::EvictReason;
use crate::auth::{extract_token, AuthError, Identity};
use crate::state::AppState;

/// Time a closing socket's writer gets to flush before it is aborted.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    /// Bearer credential.
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// On a missing or invalid credential the socket is upgraded and closed
/// with 1008 before anything is registered.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let identity = extract_token(query.token.as_deref(), &headers)
        .ok_or(AuthError::MissingToken)
        .and_then(|token| state.validator.validate(&token));

    match identity {
        Ok(identity) => {
            debug!(user_id = %identity.user_id, role = %identity.role, "handshake accepted");
            ws.on_upgrade(move |socket| handle_connection(socket, identity, state))
        }
        Err(err) => {
            state.metrics.record_auth_rejected();
            warn!(error = %err, "handshake rejected");

            let reason = match err {
                AuthError::MissingToken => "missing token",
                AuthError::Expired => "token expired",
                AuthError::Invalid(_) | AuthError::IncompleteClaims(_) => "invalid token",
            };

            ws.on_upgrade(move |mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY_VIOLATION,
                        reason: reason.into(),
                    })))
                    .await;
            })
        }
    }
}

/// Runs an authenticated connection until either side closes it.
async fn handle_connection(socket: WebSocket, identity: Identity, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.outbound_buffer);

    let mut connection = Connection::new(identity.clone(), tx);
    let connection_id = connection.id();
    let Some(mut terminated) = connection.take_termination() else {
        return;
    };

    match Outbound::json(&ServerMessage::authenticated(connection_id, identity.clone())) {
        Ok(frame) => {
            connection.try_send(frame);
        }
        Err(e) => {
            warn!(connection_id, error = %e, "failed to encode authenticated frame");
        }
    }

    state.registry.register(connection).await;
    state.metrics.record_connection_opened();
    info!(connection_id, user_id = %identity.user_id, "WebSocket connection opened");

    // Forward queued frames to the socket.
    let metrics = Arc::clone(&state.metrics);
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (message, is_close) = match frame {
                Outbound::Text(text) => (Message::Text(text.as_ref().into()), false),
                Outbound::Ping => (Message::Ping(Bytes::new()), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };

            if ws_sender.send(message).await.is_err() {
                break;
            }
            metrics.record_message_sent();

            if is_close {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!(connection_id, error = %e, "WebSocket error");
                        state.metrics.record_error();
                        break;
                    }
                    None => break,
                };

                if handle_frame(message, connection_id, &state).await.is_break() {
                    break;
                }
            }
            _ = &mut writer => {
                debug!(connection_id, "writer finished");
                writer_done = true;
                break;
            }
            _ = &mut terminated => {
                debug!(connection_id, "connection dropped by registry");
                break;
            }
        }
    }

    state.registry.unregister(connection_id).await;
    if !writer_done && !stop_writer(writer, CLOSE_GRACE).await {
        warn!(connection_id, "writer did not flush in time, aborted");
    }
    state.metrics.record_connection_closed();

    info!(connection_id, user_id = %identity.user_id, "WebSocket connection closed");
}

/// Waits up to `grace` for the writer to finish, then aborts it.
///
/// Returns true if the writer finished on its own.
async fn stop_writer(mut writer: JoinHandle<()>, grace: Duration) -> bool {
    if tokio::time::timeout(grace, &mut writer).await.is_ok() {
        return true;
    }
    writer.abort();
    false
}

/// Handles one inbound frame.
///
/// Returns `Break` when the client asked to close.
async fn handle_frame(message: Message, id: ConnectionId, state: &AppState) -> ControlFlow<()> {
    match message {
        Message::Text(text) => {
            state.metrics.record_message_received();
            match ClientMessage::parse(text.as_str()) {
                Ok(msg) => handle_client_message(msg, id, state).await,
                Err(e) => reject_frame(&e, id, state).await,
            }
        }
        Message::Binary(_) => {
            state.metrics.record_message_received();
            reject_frame(&ProtocolError::BinaryFrame, id, state).await;
        }
        Message::Ping(_) => {
            // tungstenite answers pings itself
            state.registry.touch(id).await;
        }
        Message::Pong(_) => {
            state.registry.record_pong(id).await;
        }
        Message::Close(frame) => {
            debug!(connection_id = id, ?frame, "close requested");
            return ControlFlow::Break(());
        }
    }

    ControlFlow::Continue(())
}

async fn handle_client_message(msg: ClientMessage, id: ConnectionId, state: &AppState) {
    match msg {
        ClientMessage::Ping => {
            state.registry.record_pong(id).await;
            reply(id, &ServerMessage::pong(), state).await;
        }
        ClientMessage::Pong => {
            state.registry.record_pong(id).await;
        }
        ClientMessage::Echo(data) => {
            state.registry.touch(id).await;
            reply(id, &ServerMessage::echo(data), state).await;
        }
        ClientMessage::Ack { notification_id } => {
            state.registry.touch(id).await;
            state.metrics.record_ack();
            info!(connection_id = id, notification_id, "notification acknowledged");
        }
    }
}

/// Sends an error frame and closes the connection with 1007.
async fn reject_frame(error: &ProtocolError, id: ConnectionId, state: &AppState) {
    warn!(connection_id = id, error = %error, "malformed frame");
    state.metrics.record_error();

    if let Ok(frame) = Outbound::json(&ServerMessage::error("INVALID_FRAME", error.to_string())) {
        state.registry.send_to(id, frame).await;
    }
    state.registry.evict(id, EvictReason::MalformedFrame).await;
}

async fn reply(id: ConnectionId, message: &ServerMessage, state: &AppState) {
    let queued = match Outbound::json(message) {
        Ok(frame) => state.registry.send_to(id, frame).await,
        Err(_) => false,
    };

    if !queued {
        state.registry.evict(id, EvictReason::SendFailed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    async fn setup() -> (AppState, ConnectionId, mpsc::Receiver<Outbound>) {
        let config = ServerConfig::default().with_jwt_secret("secret");
        let state = AppState::new(config).expect("state");
        let (tx, rx) = mpsc::channel(8);
        let id = state
            .registry
            .register(Connection::new(Identity::new("u-1", "guard", "v1"), tx))
            .await;
        (state, id, rx)
    }

    fn text(frame: Option<Outbound>) -> serde_json::Value {
        match frame {
            Some(Outbound::Text(text)) => serde_json::from_str(&text).expect("json"),
            other => panic!("Expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_json_ping_replies_pong_and_clears_flag() {
        let (state, id, mut rx) = setup().await;
        state.registry.heartbeat_round().await;
        assert_eq!(rx.recv().await, Some(Outbound::Ping));

        let flow = handle_frame(Message::Text(r#"{"type":"ping"}"#.into()), id, &state).await;

        assert!(flow.is_continue());
        assert_eq!(text(rx.recv().await), serde_json::json!({"type": "pong"}));
        assert_eq!(state.registry.info(id).await.map(|i| i.is_alive), Some(true));
    }

    #[tokio::test]
    async fn test_echo_is_returned_verbatim() {
        let (state, id, mut rx) = setup().await;

        handle_frame(
            Message::Text(r#"{"type":"ECHO","data":{"n":[1,2]}}"#.into()),
            id,
            &state,
        )
        .await;

        assert_eq!(
            text(rx.recv().await),
            serde_json::json!({"type": "ECHO", "data": {"n": [1, 2]}})
        );
    }

    #[tokio::test]
    async fn test_ack_is_counted() {
        let (state, id, _rx) = setup().await;

        handle_frame(
            Message::Text(r#"{"type":"ack","data":{"notification_id":3}}"#.into()),
            id,
            &state,
        )
        .await;

        assert_eq!(state.metrics.acks(), 1);
        assert!(state.registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_connection() {
        let (state, id, mut rx) = setup().await;

        let flow = handle_frame(Message::Text("{oops".into()), id, &state).await;

        assert!(flow.is_continue());
        assert_eq!(text(rx.recv().await)["data"]["code"], "INVALID_FRAME");
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: close_code::INVALID_PAYLOAD,
                reason: "malformed frame",
            })
        );
        assert!(!state.registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_unknown_type_closes_connection() {
        let (state, id, _rx) = setup().await;
        handle_frame(Message::Text(r#"{"type":"subscribe"}"#.into()), id, &state).await;
        assert!(!state.registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_stalled_writer_is_aborted_after_grace() {
        let (alive_tx, mut alive_rx) = mpsc::channel::<()>(1);
        let writer = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });

        assert!(!stop_writer(writer, Duration::from_millis(50)).await);

        // The aborted task dropped its sender.
        let closed = tokio::time::timeout(Duration::from_secs(1), alive_rx.recv())
            .await
            .expect("writer aborted");
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn test_finished_writer_is_not_aborted() {
        let writer = tokio::spawn(async {});
        assert!(stop_writer(writer, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_pong_frame_records_liveness() {
        let (state, id, _rx) = setup().await;
        state.registry.heartbeat_round().await;

        handle_frame(Message::Pong(Bytes::new()), id, &state).await;

        assert_eq!(state.registry.info(id).await.map(|i| i.is_alive), Some(true));
    }

    #[tokio::test]
    async fn test_close_frame_breaks_loop() {
        let (state, id, _rx) = setup().await;
        assert!(handle_frame(Message::Close(None), id, &state).await.is_break());
    }
}
