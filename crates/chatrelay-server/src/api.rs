use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use chatrelay_shared::serializer::{
    encode_conversation_state, encode_conversation_summaries, encode_users,
};
use chatrelay_shared::ConversationId;

use crate::cache::DomainCache;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::relay::EventRelay;
use crate::rooms::RoomRegistry;
use crate::session::SessionManager;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DomainCache>,
    pub rooms: RoomRegistry,
    pub session: Arc<SessionManager>,
    pub relay: Arc<EventRelay>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let origin = match HeaderValue::from_str(&state.config.allowed_origin) {
        Ok(origin) => Some(origin),
        Err(_) => {
            warn!(
                origin = %state.config.allowed_origin,
                "Invalid ALLOWED_ORIGIN, cross-origin requests will be rejected"
            );
            None
        }
    };
    let allow = match &origin {
        Some(origin) => AllowOrigin::exact(origin.clone()),
        None => AllowOrigin::list(Vec::<HeaderValue>::new()),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow)
        .allow_methods([Method::GET, Method::OPTIONS]);

    let static_files = ServeDir::new(&state.config.static_dir);
    let index = ServeFile::new(&state.config.index_path);

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/api/users", get(list_users))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:id", get(conversation_events))
        .route("/ws", get(ws_handler))
        .nest_service("/static", static_files)
        .route_service("/", index)
        .layer(cors);

    // CorsLayer only answers requests that carry an Origin header. The
    // allowed origin goes on every response regardless.
    let router = match origin {
        Some(origin) => router.layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            origin,
        )),
        None => router,
    };

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    session: &'static str,
    clients: usize,
    relay: &'static str,
    forwarded: u64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let relay = state
        .relay
        .task()
        .map(|task| task.outcome().label())
        .unwrap_or("stopped");

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        session: state.session.state().label(),
        clients: state.rooms.client_count().await,
        relay,
        forwarded: state.relay.forwarded(),
    })
}

async fn list_users(State(state): State<AppState>) -> Result<Response, ServerError> {
    let users = state.cache.users().await?;
    Ok(Json(encode_users(&users)).into_response())
}

async fn list_conversations(State(state): State<AppState>) -> Result<Response, ServerError> {
    let directory = state.cache.directory().await?;
    let conversations =
        encode_conversation_summaries(directory.conversations(), directory.users());
    Ok(Json(conversations).into_response())
}

/// Recent history of one conversation in the upstream's native encoding.
async fn conversation_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let conversation = ConversationId::from(id);
    if !state.cache.conversations().await?.contains(&conversation) {
        return Err(ServerError::ConversationNotFound(conversation));
    }

    let events = state
        .cache
        .event_window(&conversation, state.config.event_window)
        .await?;
    let payload = encode_conversation_state(&conversation, &events)?;
    debug!(
        conversation = %conversation,
        events = events.len(),
        payload = %hex::encode(&payload),
        "Encoded conversation state"
    );

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        payload,
    )
        .into_response())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::EventWindow;
    use chatrelay_shared::event::{ChatMessage, EventPayload};
    use chatrelay_shared::wire;
    use chatrelay_shared::{
        ConversationDirectory, ConversationEvent, ConversationSummary, EventId, User,
        UserDirectory, UserId,
    };
    use chatrelay_upstream::{ChatBackend, FixtureBackend, Snapshot};

    pub(crate) fn snapshot() -> Snapshot {
        let alice = User {
            id: UserId::new("u1", "g1"),
            full_name: "Alice".into(),
            first_name: "Alice".into(),
            photo_url: None,
            emails: vec![],
            is_self: false,
        };
        let events = (1..=5)
            .map(|i| ConversationEvent {
                event_id: Some(EventId(format!("e{i}"))),
                conversation_id: Some(ConversationId::from("c1")),
                sender_id: Some(UserId::new("u1", "g1")),
                timestamp: Some(1_700_000_000_000_000 + i),
                source_type: Some(1),
                event_type: Some(1),
                payload: EventPayload::ChatMessage(ChatMessage::from_text(&format!("msg {i}"))),
            })
            .collect();

        Snapshot {
            users: UserDirectory::from(vec![alice]),
            conversations: ConversationDirectory::from(vec![
                ConversationSummary {
                    id: ConversationId::from("c1"),
                    name: Some("General".into()),
                    participant_ids: vec![UserId::new("u1", "g1")],
                    last_modified: 1_700_000_000_000_005,
                    archived: false,
                },
                ConversationSummary {
                    id: ConversationId::from("c2"),
                    name: None,
                    participant_ids: vec![],
                    last_modified: 1,
                    archived: true,
                },
            ]),
            events: [(ConversationId::from("c1"), events)].into_iter().collect(),
        }
    }

    pub(crate) fn app_state(backend: Arc<FixtureBackend>, event_window: EventWindow) -> AppState {
        let dyn_backend: Arc<dyn ChatBackend> = backend;
        let config = ServerConfig {
            event_window,
            heartbeat: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let cache = Arc::new(DomainCache::new(dyn_backend.clone()));
        let rooms = RoomRegistry::new();
        let relay = Arc::new(EventRelay::new(
            dyn_backend.clone(),
            cache.clone(),
            rooms.clone(),
            config.heartbeat,
        ));

        AppState {
            cache,
            rooms,
            session: Arc::new(SessionManager::start(dyn_backend)),
            relay,
            config: Arc::new(config),
        }
    }

    async fn request(state: AppState, uri: &str) -> Response {
        build_router(state)
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body(response: Response) -> bytes::Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    fn backend() -> Arc<FixtureBackend> {
        Arc::new(FixtureBackend::new(snapshot()))
    }

    #[tokio::test]
    async fn test_users_endpoint() {
        let state = app_state(backend(), EventWindow::default());
        let response = request(state, "/api/users").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        let users: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(users[0]["fullName"], "Alice");
        assert_eq!(users[0]["id"]["chatId"], "u1");
    }

    #[tokio::test]
    async fn test_allow_origin_sent_without_origin_header() {
        let state = app_state(backend(), EventWindow::default());
        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/conversations/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );

        // A matching Origin is answered once, not twice.
        let response = request(state, "/health").await;
        let allowed = response
            .headers()
            .get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN);
        assert_eq!(allowed.iter().count(), 1);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn test_conversations_endpoint_includes_archived() {
        let state = app_state(backend(), EventWindow::default());
        let response = request(state, "/api/conversations").await;

        assert_eq!(response.status(), StatusCode::OK);
        let conversations: serde_json::Value =
            serde_json::from_slice(&body(response).await).unwrap();
        let conversations = conversations.as_array().unwrap();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0]["id"], "c1");
        assert_eq!(conversations[0]["users"][0]["fullName"], "Alice");
        assert_eq!(conversations[0]["lastModified"], 1_700_000_000_000_005u64);
        assert_eq!(conversations[1]["id"], "c2");
    }

    #[tokio::test]
    async fn test_conversation_endpoint_returns_first_of_window() {
        let state = app_state(backend(), EventWindow { size: 3, take: 1 });
        let response = request(state, "/api/conversations/c1").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        let state = wire::ConversationState::from_bytes(&body(response).await).unwrap();
        assert_eq!(state.conversation_id.unwrap().id.as_deref(), Some("c1"));
        assert_eq!(state.event.len(), 1);
        assert_eq!(state.event[0].event_id.as_deref(), Some("e3"));
    }

    #[tokio::test]
    async fn test_encoded_events_carry_their_own_identifiers() {
        let backend = backend();
        let state = app_state(backend.clone(), EventWindow { size: 10, take: 10 });
        let response = request(state, "/api/conversations/c1").await;

        let decoded = wire::ConversationState::from_bytes(&body(response).await).unwrap();
        let expected = backend
            .get_events(&ConversationId::from("c1"), None, 10)
            .await
            .unwrap();
        assert_eq!(decoded.event.len(), expected.len());
        for (encoded, event) in decoded.event.iter().zip(&expected) {
            assert_eq!(encoded.event_id.as_deref(), event.event_id.as_ref().map(|e| e.as_str()));
            assert_eq!(encoded.timestamp, event.timestamp);
            assert_eq!(encoded.source_type, Some(1));
            let sender = encoded.sender_id.as_ref().unwrap();
            assert_eq!(sender.chat_id.as_deref(), Some("u1"));
            assert_eq!(sender.gaia_id.as_deref(), Some("g1"));
            let conv = encoded.conversation_id.as_ref().unwrap();
            assert_eq!(conv.id.as_deref(), Some("c1"));
        }
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let state = app_state(backend(), EventWindow::default());
        let response = request(state, "/api/conversations/nope").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert!(error["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_server_error_and_not_cached() {
        let backend = backend();
        backend.fail_next_fetches(1);
        let state = app_state(backend.clone(), EventWindow::default());

        let response = request(state.clone(), "/api/users").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = request(state, "/api/users").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.directory_fetches(), 2);
    }

    #[tokio::test]
    async fn test_health_reports_session_and_relay() {
        let state = app_state(backend(), EventWindow::default());
        state.session.await_ready().await.unwrap();

        let response = request(state.clone(), "/health").await;
        let health: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["session"], "ready");
        assert_eq!(health["relay"], "stopped");

        state.relay.start().await.unwrap();
        let response = request(state, "/health").await;
        let health: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(health["relay"], "running");
        assert_eq!(health["clients"], 0);
        assert_eq!(health["forwarded"], 0);
    }
}
