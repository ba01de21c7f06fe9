//! WebSocket Connection Handler
//!
//! Upgrades `/gateway` requests, authenticates the token, registers the
//! connection, and pumps frames. Each inbound event runs as its own task so
//! a slow handler never blocks other events on the same connection.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{FutureExt, SinkExt, StreamExt};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::{ClientEvent, EventAck, Outbound};
use super::registry::LiveConnection;
use super::router::EventContext;
use crate::domain::ChatStore;
use crate::shared::error::ChatError;
use crate::shared::sanitize::sanitize_event_value;
use crate::startup::AppState;

/// JWT claims carried by gateway tokens.
#[derive(Debug, Deserialize)]
struct Claims {
    /// User id
    sub: String,
    /// Tenant id
    tid: i64,
    #[allow(dead_code)]
    exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct GatewayParams {
    token: Option<String>,
}

/// WebSocket upgrade handler. Authentication happens before the upgrade so
/// unauthenticated clients never hold a socket. The token comes from the
/// `token` query parameter or an `Authorization: Bearer` header.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<GatewayParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = match params.token.or_else(|| bearer_token(&headers)) {
        Some(token) => token,
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let claims = match validate_token(&token, &state.settings.jwt.secret) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "Gateway token rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let user_id = match claims.sub.parse::<i64>() {
        Ok(id) => id,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };
    let tenant_id = claims.tid;

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, tenant_id))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: i64, tenant_id: i64) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    state.registry.register(LiveConnection {
        connection_id: connection_id.clone(),
        user_id,
        tenant_id,
        sender: tx.clone(),
    });

    // Bulk room join for every conversation the user already belongs to.
    match state.store.conversation_ids_for_user(user_id).await {
        Ok(ids) => {
            for conversation_id in ids {
                state.registry.join_room(
                    &connection_id,
                    &super::events::conversation_room(conversation_id),
                );
            }
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Bulk room join failed");
        }
    }

    // Writer task: the only place frames leave through.
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let frame = match &outbound {
                Outbound::Event(event) => serde_json::to_string(event).ok(),
                Outbound::Ack(ack) => serde_json::to_string(ack).ok(),
                Outbound::Close => None,
            };
            match frame {
                Some(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let ctx = EventContext {
        connection_id: connection_id.clone(),
        user_id,
        tenant_id,
    };

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let event = match parse_event(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        let _ = tx.send(Outbound::Ack(EventAck::err(&e)));
                        continue;
                    }
                };

                // One task per event keeps the read loop responsive; a
                // panicking handler answers SERVER_ERROR instead of tearing
                // down the connection.
                let router = state.router.clone();
                let ctx = ctx.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let dispatch =
                        std::panic::AssertUnwindSafe(router.dispatch(&ctx, event)).catch_unwind();
                    match dispatch.await {
                        Ok(Some(ack)) => {
                            let _ = tx.send(Outbound::Ack(ack));
                        }
                        Ok(None) => {}
                        Err(_) => {
                            tracing::error!(
                                user_id = ctx.user_id,
                                connection_id = %ctx.connection_id,
                                "Event handler panicked"
                            );
                            let err = ChatError::Internal("event handler panicked".into());
                            let _ = tx.send(Outbound::Ack(EventAck::err(&err)));
                        }
                    }
                });
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(&connection_id);
    writer.abort();
    tracing::debug!(user_id, connection_id = %connection_id, "Connection closed");
}

/// Parse one inbound frame, sanitizing string payload fields first.
fn parse_event(text: &str) -> Result<ClientEvent, ChatError> {
    let mut value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ChatError::InvalidInput(format!("Malformed event: {e}")))?;
    if let Some(data) = value.get_mut("data") {
        sanitize_event_value(data);
    }
    serde_json::from_value(value)
        .map_err(|e| ChatError::InvalidInput(format!("Malformed event: {e}")))
}

/// Spawn the periodic throttle sweep for a router.
pub fn spawn_throttle_sweep<S: ChatStore>(
    router: Arc<super::router::EventRouter<S>>,
) -> tokio::task::JoinHandle<()> {
    let period = std::time::Duration::from_secs(router.throttle_settings().sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            router.throttle().sweep(period * 2);
        }
    })
}
