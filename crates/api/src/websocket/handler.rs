//! WebSocket handler for Axum
//!
//! Authenticates the handshake, upgrades, and dispatches client events
//! through the room router one at a time per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use chatdesk_shared::{ChatError, ChatResult};
use futures::{stream::StreamExt, SinkExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::routes::client_addr;
use crate::state::AppState;

use super::{
    auth::{Authenticated, Handshake},
    connection::Connection,
    events::{ClientEvent, ServerEvent},
    router::{MessageAck, RoomRouter},
};

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// Credentials come from the query string. Failures are answered with an
/// HTTP error before the upgrade, so no socket is ever opened for them.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(handshake): Query<Handshake>,
) -> ApiResult<Response> {
    let client_ip = client_addr(&headers, peer, app_state.config.trust_proxy_headers);

    let authenticated = app_state
        .authenticator
        .authenticate(client_ip, &handshake)
        .await
        .inspect_err(|e| {
            tracing::debug!(
                client_ip = %client_ip,
                code = e.code(),
                "WebSocket handshake rejected"
            );
        })?;

    tracing::info!(
        tenant_id = %authenticated.tenant_id,
        role = authenticated.principal.role(),
        "WebSocket connection upgrade requested"
    );

    let auto_join = handshake.conversation_id;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, authenticated, auto_join)))
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    app_state: AppState,
    authenticated: Authenticated,
    auto_join: Option<Uuid>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let conn = Connection::new(authenticated.tenant_id, authenticated.principal, tx);
    let conn = app_state.ws_state.add_connection(conn).await;
    let session_id = conn.session_id;

    // Send connection acknowledgment
    let _ = conn.send(ServerEvent::Connected {
        session_id,
        tenant_id: conn.tenant_id,
        role: conn.principal.role(),
        participant: conn.room_participant(),
    });

    app_state.presence.connected(&conn).await;

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    let router = Arc::clone(&app_state.router);

    if let Some(conversation_id) = auto_join {
        if let Err(e) = router.join(&conn, conversation_id).await {
            let _ = conn.send(ServerEvent::error(
                &e,
                Some("join_conversation"),
                Some(conversation_id),
            ));
        }
    }

    while let Some(msg) = receiver.next().await {
        let Ok(msg) = msg else {
            break;
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    let operation = event.operation();
                    let conversation_id = event.conversation_id();
                    if let Err(e) = handle_client_event(event, &conn, &router).await {
                        tracing::debug!(
                            session_id = %session_id,
                            operation,
                            code = e.code(),
                            "Client event failed"
                        );
                        let _ = conn.send(ServerEvent::error(&e, Some(operation), conversation_id));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        session_id = %session_id,
                        "Failed to parse client event"
                    );
                    let _ = conn.send(ServerEvent::error(
                        &ChatError::Validation("Invalid event format".to_string()),
                        None,
                        None,
                    ));
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }

    tracing::info!(session_id = %session_id, "WebSocket connection closing");
    app_state.presence.disconnected(&conn).await;

    send_task.abort();
}

/// Handle one client event. Errors go back to this connection only.
async fn handle_client_event(
    event: ClientEvent,
    conn: &Arc<Connection>,
    router: &RoomRouter,
) -> ChatResult<()> {
    use ClientEvent::*;

    match event {
        JoinConversation { conversation_id } => {
            router.join(conn, conversation_id).await?;
        }

        LeaveConversation { conversation_id } => {
            router.leave(conn, conversation_id).await;
        }

        SendMessage {
            conversation_id,
            content,
            message_type,
            client_message_id,
        } => {
            let actor = conn.actor().ok_or(ChatError::AccessDenied)?;
            router
                .send_message(
                    &actor,
                    conversation_id,
                    &content,
                    message_type,
                    Some(MessageAck {
                        connection: conn,
                        client_message_id,
                    }),
                )
                .await?;
        }

        TypingStart { conversation_id } => {
            router.typing(conn, conversation_id, true).await?;
        }

        TypingStop { conversation_id } => {
            router.typing(conn, conversation_id, false).await?;
        }

        MarkRead { conversation_id } => {
            let actor = conn.actor().ok_or(ChatError::AccessDenied)?;
            router
                .mark_read(&actor, conversation_id, Some(conn.session_id))
                .await?;
        }

        GetRoomParticipants { conversation_id } => {
            let participants = router.room_participants(conn, conversation_id).await?;
            let _ = conn.send(ServerEvent::RoomParticipants {
                conversation_id,
                participants,
            });
        }

        Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }

    Ok(())
}
