use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{Method, StatusCode},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use parley_core::Relay;
use parley_shared::constants::{MAX_GROUP_MEMBERS, MAX_GROUP_NAME_LEN, MAX_MESSAGE_SIZE};
use parley_shared::models::{ContactView, GroupView, Message};
use parley_shared::types::{ChannelId, ConnectionId, Identity};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub config: Arc<ServerConfig>,
    pub rate_limiter: RateLimiter,
    pub event_limiter: RateLimiter<ConnectionId>,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(relay: Relay, config: ServerConfig) -> Self {
        let rate = config.rate_limit_per_sec;
        let burst = config.rate_limit_burst;
        Self {
            relay,
            config: Arc::new(config),
            rate_limiter: RateLimiter::new(rate, burst),
            event_limiter: RateLimiter::new(rate, burst),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserve a WebSocket slot. `None` when the connection cap is reached.
    pub fn try_acquire_connection(&self) -> Option<ConnectionSlot> {
        let max = self.config.max_connections;
        let reserved = self
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (max == 0 || current < max).then_some(current + 1)
            })
            .is_ok();

        reserved.then(|| ConnectionSlot {
            counter: Arc::clone(&self.connections),
        })
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }
}

/// One reserved WebSocket slot, released on drop.
pub struct ConnectionSlot {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws::ws_handler))
        .route("/messages", get(direct_history))
        .route("/group-messages", get(group_history))
        .route("/contacts", get(list_contacts))
        .route("/groups", get(list_groups))
        .route("/accept-invite", post(accept_invite))
        .route("/delete-contact", delete(delete_contact))
        .route("/create-group", post(create_group))
        .route("/delete-group", delete(delete_group))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    max_connections: usize,
    active_connections: usize,
    max_message_size: usize,
    max_group_members: usize,
    max_group_name_len: usize,
}

#[derive(Deserialize)]
struct HistoryQuery {
    from: Identity,
    to: Identity,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupHistoryQuery {
    group_id: String,
}

#[derive(Deserialize)]
struct UserQuery {
    user: Identity,
}

#[derive(Deserialize)]
struct AcceptInviteRequest {
    from: Identity,
    to: Identity,
    #[serde(default)]
    name: Option<String>,
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteContactRequest {
    user_id: Identity,
    contact_id: Identity,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteContactResponse {
    deleted: bool,
    messages_removed: usize,
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    creator: Identity,
    #[serde(default)]
    members: Vec<Identity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteGroupRequest {
    group_id: ChannelId,
    admin_id: Identity,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online: state.relay.online_count(),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        max_connections: state.config.max_connections,
        active_connections: state.active_connections(),
        max_message_size: MAX_MESSAGE_SIZE,
        max_group_members: MAX_GROUP_MEMBERS,
        max_group_name_len: MAX_GROUP_NAME_LEN,
    })
}

async fn direct_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let messages = state.relay.history(&query.from, &query.to).await?;
    Ok(Json(messages))
}

async fn group_history(
    State(state): State<AppState>,
    Query(query): Query<GroupHistoryQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let channel_id: ChannelId = query
        .group_id
        .parse()
        .map_err(|e| ServerError::BadRequest(format!("Invalid groupId: {e}")))?;
    let messages = state.relay.group_history(channel_id).await?;
    Ok(Json(messages))
}

async fn list_contacts(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<ContactView>>, ServerError> {
    let snapshot = state.relay.snapshot(&query.user).await?;
    Ok(Json(snapshot.contacts))
}

async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<GroupView>>, ServerError> {
    let snapshot = state.relay.snapshot(&query.user).await?;
    Ok(Json(snapshot.groups))
}

async fn accept_invite(
    State(state): State<AppState>,
    Json(req): Json<AcceptInviteRequest>,
) -> Result<Json<ContactView>, ServerError> {
    let contact = state
        .relay
        .accept_invite(req.from.clone(), req.to, req.name, &req.code)
        .await?;

    let view = contact
        .view_for(&req.from)
        .ok_or_else(|| ServerError::Internal("contact does not involve accepter".into()))?;

    info!(from = %req.from, contact = %contact.id, "Invite accepted via API");
    Ok(Json(view))
}

async fn delete_contact(
    State(state): State<AppState>,
    Json(req): Json<DeleteContactRequest>,
) -> Result<Json<DeleteContactResponse>, ServerError> {
    let removal = state
        .relay
        .delete_contact(&req.user_id, &req.contact_id)
        .await?;

    Ok(Json(DeleteContactResponse {
        deleted: removal.contact_removed,
        messages_removed: removal.messages_removed,
    }))
}

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupView>), ServerError> {
    let group = state
        .relay
        .create_group(req.creator, &req.name, req.members)
        .await?;
    Ok((StatusCode::CREATED, Json(group.view())))
}

async fn delete_group(
    State(state): State<AppState>,
    Json(req): Json<DeleteGroupRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.relay.delete_group(req.group_id, &req.admin_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use parley_core::SqliteGateway;
    use tower::ServiceExt;

    fn state() -> AppState {
        let gateway = SqliteGateway::open_in_memory().unwrap();
        AppState::new(Relay::new(Arc::new(gateway)), ServerConfig::default())
    }

    async fn call(
        state: &AppState,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let state = state();
        let (status, body) = call(&state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["online"], 0);
    }

    #[tokio::test]
    async fn test_info_reports_limits() {
        let state = state();
        let (status, body) = call(&state, Method::GET, "/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Parley Relay");
        assert_eq!(body["maxMessageSize"], MAX_MESSAGE_SIZE);
    }

    #[tokio::test]
    async fn test_accept_invite_then_list_contacts() {
        let state = state();
        let invite = serde_json::json!({"from": "A", "to": "B", "name": "Bob", "code": "code1"});

        let (status, body) = call(&state, Method::POST, "/accept-invite", Some(invite.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["otherUser"], "B");
        assert_eq!(body["displayName"], "Bob");

        // Retrying is harmless
        let (status, _) = call(&state, Method::POST, "/accept-invite", Some(invite)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, contacts) = call(&state, Method::GET, "/contacts?user=B", None).await;
        let contacts = contacts.as_array().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0]["otherUser"], "A");
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let state = state();
        let (status, group) = call(
            &state,
            Method::POST,
            "/create-group",
            Some(serde_json::json!({"name": "Team", "creator": "A", "members": ["B", "C"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(group["members"], serde_json::json!(["A", "B", "C"]));
        let group_id = group["id"].as_str().unwrap().to_string();

        let channel: ChannelId = group_id.parse().unwrap();
        state
            .relay
            .send_message(parley_shared::protocol::SendMessage {
                from: "B".into(),
                to: group_id.clone(),
                content: "hello".into(),
                is_group: true,
            })
            .await
            .unwrap();

        let (_, history) = call(
            &state,
            Method::GET,
            &format!("/group-messages?groupId={group_id}"),
            None,
        )
        .await;
        assert_eq!(history.as_array().unwrap().len(), 1);

        let (_, groups) = call(&state, Method::GET, "/groups?user=C", None).await;
        assert_eq!(groups.as_array().unwrap().len(), 1);

        let (status, body) = call(
            &state,
            Method::DELETE,
            "/delete-group",
            Some(serde_json::json!({"groupId": group_id, "adminId": "B"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("creator"));

        let (status, _) = call(
            &state,
            Method::DELETE,
            "/delete-group",
            Some(serde_json::json!({"groupId": group_id, "adminId": "A"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.relay.group_history(channel).await.unwrap().is_empty());

        let (status, _) = call(
            &state,
            Method::DELETE,
            "/delete-group",
            Some(serde_json::json!({"groupId": group_id, "adminId": "A"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_contact_clears_history() {
        let state = state();
        state
            .relay
            .accept_invite("A".into(), "B".into(), None, "code1")
            .await
            .unwrap();
        for content in ["one", "two", "three"] {
            state
                .relay
                .send_message(parley_shared::protocol::SendMessage {
                    from: "A".into(),
                    to: "B".into(),
                    content: content.into(),
                    is_group: false,
                })
                .await
                .unwrap();
        }

        let (_, history) = call(&state, Method::GET, "/messages?from=B&to=A", None).await;
        assert_eq!(history.as_array().unwrap().len(), 3);

        let (status, body) = call(
            &state,
            Method::DELETE,
            "/delete-contact",
            Some(serde_json::json!({"userId": "A", "contactId": "B"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);
        assert_eq!(body["messagesRemoved"], 3);

        let (_, history) = call(&state, Method::GET, "/messages?from=A&to=B", None).await;
        assert!(history.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let state = state();
        let (status, _) = call(&state, Method::GET, "/group-messages?groupId=nope", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &state,
            Method::POST,
            "/accept-invite",
            Some(serde_json::json!({"from": "A", "to": "A", "code": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_connection_cap() {
        let config = ServerConfig {
            max_connections: 1,
            ..ServerConfig::default()
        };
        let gateway = SqliteGateway::open_in_memory().unwrap();
        let state = AppState::new(Relay::new(Arc::new(gateway)), config);

        let slot = state.try_acquire_connection().unwrap();
        assert!(state.try_acquire_connection().is_none());
        assert_eq!(state.active_connections(), 1);

        drop(slot);
        assert!(state.try_acquire_connection().is_some());
    }
}
