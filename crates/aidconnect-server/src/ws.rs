//! WebSocket endpoint for the realtime channel.
//!
//! The token is checked before the upgrade, so an unauthenticated client
//! never gets a socket. Once upgraded, the task multiplexes two streams:
//! inbound frames from the client and outbound events queued for this
//! connection by the registry.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aidconnect_shared::protocol::ClientEvent;

use crate::api::AppState;
use crate::auth::{bearer_token, AuthUser, TokenVerifier};
use crate::dispatcher::{Dispatcher, RealtimeSession};
use crate::error::ServerError;
use crate::events::{ErrorEvent, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let user = match authenticate(&query, &headers, state.dispatcher.verifier()) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, user))
}

/// Token from `?token=` or, failing that, the bearer header.
fn authenticate(
    query: &WsQuery,
    headers: &HeaderMap,
    verifier: &Arc<dyn TokenVerifier>,
) -> Result<AuthUser, ServerError> {
    let token = query
        .token
        .as_deref()
        .or_else(|| bearer_token(headers))
        .ok_or_else(|| ServerError::Auth("Authentication error".into()))?;
    verifier.verify(token)
}

/// What the socket loop does after one inbound frame.
#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Reply(ServerEvent),
    Pong(Vec<u8>),
    Close,
}

async fn handle_frame(session: &RealtimeSession, frame: WsMessage) -> Flow {
    match frame {
        WsMessage::Text(text) => {
            let result = match ClientEvent::from_json(&text) {
                Ok(event) => session.handle(event).await,
                Err(e) => Err(ServerError::Validation(format!("Invalid frame: {e}"))),
            };
            match result {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    debug!(user = %session.user.id, error = %e, "event rejected");
                    Flow::Reply(ServerEvent::Error(ErrorEvent {
                        message: e.public_message(),
                    }))
                }
            }
        }
        WsMessage::Ping(data) => Flow::Pong(data),
        WsMessage::Close(_) => Flow::Close,
        WsMessage::Binary(_) | WsMessage::Pong(_) => Flow::Continue,
    }
}

async fn handle_socket(socket: WebSocket, dispatcher: Dispatcher, user: AuthUser) {
    let (session, mut events) = dispatcher.attach(user);
    let (mut sink, mut stream) = socket.split();

    debug!(user = %user.id, conn = %session.id, "socket open");

    loop {
        tokio::select! {
            outbound = events.recv() => {
                let Some(event) = outbound else { break };
                if !send_event(&mut sink, &event).await {
                    break;
                }
            }
            inbound = stream.next() => {
                let flow = match inbound {
                    Some(Ok(frame)) => handle_frame(&session, frame).await,
                    Some(Err(e)) => {
                        debug!(user = %user.id, error = %e, "socket error");
                        Flow::Close
                    }
                    None => Flow::Close,
                };
                let open = match flow {
                    Flow::Continue => true,
                    Flow::Reply(event) => send_event(&mut sink, &event).await,
                    Flow::Pong(data) => sink.send(WsMessage::Pong(data)).await.is_ok(),
                    Flow::Close => false,
                };
                if !open {
                    break;
                }
            }
        }
    }

    close_session(session, events);
}

/// Unregister the connection and discard whatever was still queued for it.
fn close_session(mut session: RealtimeSession, mut events: mpsc::Receiver<ServerEvent>) {
    session.disconnect();
    events.close();
    let mut dropped = 0usize;
    while events.try_recv().is_ok() {
        dropped += 1;
    }
    debug!(user = %session.user.id, conn = %session.id, dropped, "socket closed");
}

async fn send_event(sink: &mut SplitSink<WebSocket, WsMessage>, event: &ServerEvent) -> bool {
    match event.to_json() {
        Ok(text) => sink.send(WsMessage::Text(text)).await.is_ok(),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to encode event");
            true
        }
    }
}
