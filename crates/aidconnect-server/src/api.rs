use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use aidconnect_shared::protocol::SendPayload;
use aidconnect_shared::types::{
    MessageId, NotificationId, NotificationType, RequestId, RequestStatus, Role, SessionId, UserId,
};
use aidconnect_shared::MessageContent;
use aidconnect_store::{
    now, ChatSession, Database, HelpRequest, Message, Notification, ScopeFilter, SessionScope,
    StoreError, User,
};

use crate::auth::{require_auth, AuthUser};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::notifications::RequestEvent;
use crate::events::StatusEvent;
use crate::store::Store;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub store: Store,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin(&state.config.client_url))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let api = Router::new()
        .route("/messages/conversation", post(start_conversation))
        .route("/messages/conversations", get(list_conversations))
        .route("/messages/conversation/user/:user_id", get(conversation_with_user))
        .route("/messages/conversation/:id", get(get_conversation))
        .route("/messages/send", post(send_message))
        .route("/messages/read", put(mark_messages_read))
        .route("/messages/:user_id", get(messages_with_user))
        .route("/chat/rooms", get(list_rooms))
        .route("/chat/room", post(create_room))
        .route("/chat/room/:id", get(get_room))
        .route("/chat/request/:request_id", get(room_for_request))
        .route("/chat/room/:id/messages", get(room_messages).post(send_room_message))
        .route(
            "/notifications",
            get(list_notifications).delete(delete_notifications),
        )
        .route("/notifications/unread/count", get(unread_notification_count))
        .route("/notifications/read-all", put(mark_all_notifications_read))
        .route("/notifications/:id/read", put(mark_notification_read))
        .route("/users/:id/presence", get(user_presence))
        .route_layer(middleware::from_fn_with_state(
            state.dispatcher.verifier().clone(),
            require_auth,
        ));

    let internal = Router::new()
        .route("/users", post(upsert_user))
        .route("/requests", post(upsert_request))
        .route("/requests/:id/events", post(request_event));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .nest("/api", api)
        .nest("/internal", internal)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn allowed_origin(client_url: &str) -> AllowOrigin {
    match HeaderValue::from_str(client_url) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(_) => {
            warn!(value = %client_url, "CLIENT_URL is not a valid origin, allowing any");
            AllowOrigin::any()
        }
    }
}

// ─── Response shapes ───

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
    online_users: usize,
}

/// A session as seen by one of its participants.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    #[serde(flatten)]
    session: ChatSession,
    other_participant: Option<User>,
    last_message: Option<Message>,
    unread_count: u64,
}

#[derive(Serialize)]
struct ConversationResponse {
    conversation: SessionView,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct CountResponse {
    count: u64,
}

#[derive(Serialize)]
struct ModifiedResponse {
    modified: usize,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: usize,
}

// ─── Request shapes ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartConversationRequest {
    participant_id: Option<UserId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadRequest {
    #[serde(default)]
    message_ids: Vec<MessageId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    request_id: Option<RequestId>,
    volunteer_id: Option<UserId>,
    requester_id: Option<UserId>,
}

#[derive(Deserialize)]
struct RoomMessageRequest {
    #[serde(default)]
    text: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteNotificationsRequest {
    notification_ids: Option<Vec<NotificationId>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertUserRequest {
    id: UserId,
    name: String,
    role: Role,
    profile_picture: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertRequestRequest {
    id: RequestId,
    title: String,
    status: RequestStatus,
    requester_id: UserId,
    volunteer_id: Option<UserId>,
}

#[derive(Deserialize)]
struct RequestEventRequest {
    #[serde(rename = "type")]
    kind: NotificationType,
    #[serde(flatten)]
    event: RequestEventBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestEventBody {
    recipient_id: UserId,
    sender_id: Option<UserId>,
    title: String,
    message: String,
}

// ─── Helpers ───

fn view_session(db: &Database, session: ChatSession, viewer: UserId) -> Result<SessionView, StoreError> {
    let other_participant = match session.other_participant(viewer) {
        Some(other) => match db.get_user(other) {
            Ok(user) => Some(user),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e),
        },
        None => None,
    };

    let last_message = match session.last_message_id {
        Some(id) => match db.get_message(id) {
            Ok(message) => Some(message),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e),
        },
        None => None,
    };

    let unread_count = db.count_unread(viewer, session.id)?;

    Ok(SessionView {
        session,
        other_participant,
        last_message,
        unread_count,
    })
}

fn list_views(db: &Database, viewer: UserId, scope: ScopeFilter) -> Result<Vec<SessionView>, StoreError> {
    db.list_sessions_for_user(viewer, Some(scope))?
        .into_iter()
        .map(|session| view_session(db, session, viewer))
        .collect()
}

/// Load a session the caller takes part in.
async fn participant_session(
    store: &Store,
    id: SessionId,
    caller: UserId,
    not_found: &'static str,
) -> Result<ChatSession, ServerError> {
    let session = store
        .run(move |db| db.get_session(id))
        .await
        .map_err(|e| match e {
            ServerError::NotFound(_) => ServerError::NotFound(not_found.into()),
            other => other,
        })?;

    if !session.has_participant(caller) {
        return Err(ServerError::Forbidden("Not a participant of this chat".into()));
    }
    Ok(session)
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Internal API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = crate::auth::bearer_token(headers).unwrap_or("");

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

// ─── Health ───

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
        online_users: state.dispatcher.registry().online_users(),
    })
}

// ─── Conversations ───

async fn start_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<StartConversationRequest>,
) -> Result<Json<SessionView>, ServerError> {
    let participant = req
        .participant_id
        .ok_or_else(|| ServerError::Validation("participantId is required".into()))?;

    let session = state
        .dispatcher
        .resolver()
        .find_or_create(user.id, participant)
        .await?;

    let view = state
        .store
        .run(move |db| view_session(db, session, user.id))
        .await?;
    Ok(Json(view))
}

async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<SessionView>>, ServerError> {
    let views = state
        .store
        .run(move |db| list_views(db, user.id, ScopeFilter::Peer))
        .await?;
    Ok(Json(views))
}

async fn conversation_with_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(peer): Path<UserId>,
) -> Result<Json<Option<SessionView>>, ServerError> {
    let view = state
        .store
        .run(move |db| match db.find_peer_session(user.id, peer)? {
            Some(session) => view_session(db, session, user.id).map(Some),
            None => Ok(None),
        })
        .await?;
    Ok(Json(view))
}

async fn get_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<SessionId>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let session = participant_session(&state.store, id, user.id, "Conversation not found").await?;

    let response = state
        .store
        .run(move |db| {
            let messages = db.list_messages_for_session(session.id)?;
            Ok(ConversationResponse {
                conversation: view_session(db, session, user.id)?,
                messages,
            })
        })
        .await?;
    Ok(Json(response))
}

// ─── Messages ───

async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SendPayload>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let content = req.content()?;
    let message = state
        .dispatcher
        .send(user.id, req.receiver_id, req.text, content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_messages_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<ModifiedResponse>, ServerError> {
    let modified = state.dispatcher.mark_as_read(user.id, req.message_ids).await?;
    Ok(Json(ModifiedResponse { modified }))
}

/// Messages exchanged with a peer, oldest first. Opening the thread marks
/// the peer's messages to the caller as read.
async fn messages_with_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(peer): Path<UserId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let messages = state
        .store
        .run(move |db| {
            db.mark_read_from_peer(peer, user.id, now())?;
            db.list_messages_between(user.id, peer)
        })
        .await?;
    Ok(Json(messages))
}

// ─── Chat rooms ───

async fn list_rooms(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<SessionView>>, ServerError> {
    let views = state
        .store
        .run(move |db| list_views(db, user.id, ScopeFilter::Request))
        .await?;
    Ok(Json(views))
}

async fn create_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<SessionView>, ServerError> {
    let (Some(request_id), Some(volunteer_id), Some(requester_id)) =
        (req.request_id, req.volunteer_id, req.requester_id)
    else {
        return Err(ServerError::Validation(
            "Request ID, volunteer ID, and requester ID are required".into(),
        ));
    };

    let room = state
        .dispatcher
        .resolver()
        .find_or_create_room(user.id, request_id, volunteer_id, requester_id)
        .await?;

    let view = state
        .store
        .run(move |db| view_session(db, room, user.id))
        .await?;
    Ok(Json(view))
}

async fn get_room(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionView>, ServerError> {
    let room = participant_session(&state.store, id, user.id, "Chat room not found").await?;
    if !matches!(room.scope, SessionScope::Request { .. }) {
        return Err(ServerError::NotFound("Chat room not found".into()));
    }

    let view = state
        .store
        .run(move |db| view_session(db, room, user.id))
        .await?;
    Ok(Json(view))
}

async fn room_for_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(request_id): Path<RequestId>,
) -> Result<Json<SessionView>, ServerError> {
    let room = state
        .store
        .run(move |db| db.find_session_by_request(request_id))
        .await?
        .ok_or_else(|| ServerError::NotFound("Chat room not found".into()))?;

    if !room.has_participant(user.id) {
        return Err(ServerError::Forbidden("Not a participant of this chat".into()));
    }

    let view = state
        .store
        .run(move |db| view_session(db, room, user.id))
        .await?;
    Ok(Json(view))
}

async fn room_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<SessionId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let room = participant_session(&state.store, id, user.id, "Chat room not found").await?;
    let messages = state
        .store
        .run(move |db| db.list_messages_for_session(room.id))
        .await?;
    Ok(Json(messages))
}

async fn send_room_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<SessionId>,
    Json(req): Json<RoomMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let content = MessageContent::from_parts(req.kind.as_deref(), req.metadata.as_ref())?;
    let message = state
        .dispatcher
        .send_in_session(user.id, id, req.text, content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

// ─── Notifications ───

async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Notification>>, ServerError> {
    let limit = state.config.notification_limit;
    let notifications = state
        .store
        .run(move |db| db.list_notifications(user.id, limit))
        .await?;
    Ok(Json(notifications))
}

async fn unread_notification_count(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<CountResponse>, ServerError> {
    let count = state
        .store
        .run(move |db| db.count_unread_notifications(user.id))
        .await?;
    Ok(Json(CountResponse { count }))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<NotificationId>,
) -> Result<Json<Notification>, ServerError> {
    let notification = state
        .dispatcher
        .notifications()
        .mark_read(id, user.id)
        .await?;
    Ok(Json(notification))
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ModifiedResponse>, ServerError> {
    let modified = state
        .store
        .run(move |db| db.mark_all_notifications_read(user.id, now()))
        .await?;
    Ok(Json(ModifiedResponse { modified }))
}

/// Delete the listed notifications, or every read one when no ids are given.
/// A body that is present but malformed is rejected, never read as "no ids".
async fn delete_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Result<Json<DeletedResponse>, ServerError> {
    let ids = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<DeleteNotificationsRequest>(&body)
            .map_err(|e| ServerError::Validation(format!("Invalid request body: {e}")))?
            .notification_ids
    };
    let deleted = state
        .store
        .run(move |db| match ids {
            Some(ids) => db.delete_notifications(&ids, user.id),
            None => db.delete_read_notifications(user.id),
        })
        .await?;
    Ok(Json(DeletedResponse { deleted }))
}

// ─── Presence ───

async fn user_presence(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Json<StatusEvent> {
    Json(state.dispatcher.presence().presence(id))
}

// ─── Internal collaborator endpoints ───

async fn upsert_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<UpsertUserRequest>,
) -> Result<Json<User>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let user = User {
        id: req.id,
        name: req.name,
        role: req.role,
        profile_picture: req.profile_picture,
        created_at: now(),
    };
    let stored = user.clone();
    state.store.run(move |db| db.upsert_user(&stored)).await?;

    info!(user = %user.id, role = user.role.as_str(), "user upserted");
    Ok(Json(user))
}

async fn upsert_request(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<UpsertRequestRequest>,
) -> Result<Json<HelpRequest>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let request = HelpRequest {
        id: req.id,
        title: req.title,
        status: req.status,
        requester_id: req.requester_id,
        volunteer_id: req.volunteer_id,
        updated_at: now(),
    };
    let stored = request.clone();
    state.store.run(move |db| db.upsert_request(&stored)).await?;

    info!(request = %request.id, status = request.status.as_str(), "help request upserted");
    Ok(Json(request))
}

async fn request_event(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(request_id): Path<RequestId>,
    Json(req): Json<RequestEventRequest>,
) -> Result<(StatusCode, Json<Notification>), ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let notification = state
        .dispatcher
        .notifications()
        .notify_request_event(
            req.kind,
            RequestEvent {
                recipient_id: req.event.recipient_id,
                sender_id: req.event.sender_id,
                request_id,
                title: req.event.title,
                message: req.event.message,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
