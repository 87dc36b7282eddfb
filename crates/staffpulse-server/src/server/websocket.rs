use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use staffpulse_core::{ClientMessage, ConnectionId, PrincipalId, RoomName};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::extract_credential;
use crate::config::ServerConfig;
use crate::registry::Outbound;
use crate::state::AppState;

/// Handshake query parameters
#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket handler. The credential is checked before the upgrade, so a
/// rejected handshake never becomes a connection.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(credential) = extract_credential(&headers, query.token.as_deref()) else {
        state.metrics.record_rejected();
        warn!("Handshake refused: no credential");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let principal = match state.resolver.resolve(&credential).await {
        Ok(principal) => principal,
        Err(e) => {
            state.metrics.record_rejected();
            warn!(error = %e, "Handshake refused");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, principal, state))
}

async fn handle_socket(socket: WebSocket, principal: PrincipalId, state: AppState) {
    let conn_id = ConnectionId::generate();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.outbound_queue);

    let admission = match state.registry.admit(conn_id, principal.clone(), tx) {
        Ok(admission) => admission,
        Err(e) => {
            warn!(%conn_id, user_id = %principal, error = %e, "Admission failed");
            return;
        }
    };
    info!(%conn_id, user_id = %principal, online = admission.online_count, "Connection admitted");

    if state.config.presence && admission.first_for_principal {
        state
            .dispatcher
            .presence(&principal, true, admission.online_count);
    }

    let (mut sender, mut receiver) = socket.split();

    // Outbound queue -> socket
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(frame) => {
                    if sender.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Socket -> registry/dispatcher
    let recv_state = state.clone();
    let recv_principal = principal.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_client_frame(&text, conn_id, &recv_principal, &recv_state);
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {
                    // Pong is handled automatically by axum
                }
                Message::Binary(_) => {
                    debug!(%conn_id, "Ignoring binary frame");
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some(departure) = state.registry.remove(conn_id) {
        info!(%conn_id, user_id = %principal, online = departure.online_count, "Connection closed");
        if state.config.presence && departure.last_for_principal {
            state
                .dispatcher
                .presence(&principal, false, departure.online_count);
        }
    }
}

/// Apply one client message on behalf of its connection
pub(crate) fn handle_client_frame(
    text: &str,
    conn_id: ConnectionId,
    principal: &PrincipalId,
    state: &AppState,
) {
    let message = match ClientMessage::from_frame(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(%conn_id, error = %e, "Failed to parse client message");
            return;
        }
    };
    debug!(%conn_id, event = message.name(), "Client message");

    let result = match message {
        ClientMessage::JoinUserRoom { user_id } => {
            if user_id == principal.as_str() {
                state.registry.join(conn_id, &RoomName::user(principal))
            } else {
                warn!(
                    %conn_id,
                    user_id = %principal,
                    requested = %user_id,
                    "Refusing to join another user's room"
                );
                Ok(false)
            }
        }
        ClientMessage::JoinRoom { room } => {
            if may_join(principal, &room, &state.config) {
                state.registry.join(conn_id, &room)
            } else {
                warn!(%conn_id, user_id = %principal, room = %room, "Refusing to join room");
                Ok(false)
            }
        }
        ClientMessage::LeaveRoom { room } => state.registry.leave(conn_id, &room),
        ClientMessage::SubscribeDashboard => state.registry.join(conn_id, &RoomName::dashboard()),
        ClientMessage::SupportMessage(message) => {
            if may_post(principal, message.conversation_id.as_deref(), &state.config) {
                state.dispatcher.support_message(principal, message);
                Ok(true)
            } else {
                warn!(%conn_id, user_id = %principal, "Refusing support message");
                Ok(false)
            }
        }
        ClientMessage::Typing(typing) => {
            if may_post(principal, typing.conversation_id.as_deref(), &state.config) {
                state.dispatcher.typing(principal, typing);
                Ok(true)
            } else {
                warn!(%conn_id, user_id = %principal, "Refusing typing indicator");
                Ok(false)
            }
        }
        ClientMessage::MarkNotificationRead { notification_id } => {
            state.receipts.notification_read(principal, &notification_id);
            Ok(true)
        }
    };

    if let Err(e) = result {
        warn!(%conn_id, error = %e, "Client message rejected");
    }
}

/// Personal rooms belong to their owner. Support rooms belong to their
/// owner and the configured agents. Every other room is open.
fn may_join(principal: &PrincipalId, room: &RoomName, config: &ServerConfig) -> bool {
    if let Some(owner) = room.user_id() {
        return owner == principal.as_str();
    }
    match room.support_conversation() {
        Some(conversation) => may_post(principal, Some(conversation), config),
        None => true,
    }
}

/// A user posts into their own conversation; agents post anywhere
fn may_post(principal: &PrincipalId, conversation: Option<&str>, config: &ServerConfig) -> bool {
    match conversation.map(str::trim).filter(|id| !id.is_empty()) {
        None => true,
        Some(id) => id == principal.as_str() || config.is_support_agent(principal),
    }
}
