//! HTTP and WebSocket handlers for the Vigil server.
//!
//! Each WebSocket route upgrades, wraps the socket as a [`Connection`] and
//! hands it to the hub for its whole lifetime.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, Metered};
use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use vigil_core::{Error, Hub, MemoryStore};
use vigil_protocol::ParticipantId;
use vigil_transport::WebSocketConnection;

/// Shared server state.
pub struct AppState {
    /// Registries, collaborators and routing.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state with the configured development collaborators.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Hub::builder()
            .config(config.hub_config())
            .verifier(Arc::new(config.directory.verifier()))
            .sessions(Arc::new(config.directory.sessions()))
            .store(Arc::new(MemoryStore::new()))
            .build();

        Self {
            hub: Arc::new(hub),
            config,
        }
    }
}

/// The `token` query parameter every endpoint takes.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let transport = &state.config.transport;
    let api = Router::new()
        .route(&transport.chat_path, get(chat_handler))
        .route(&transport.monitor_path, get(monitor_handler))
        .route(&transport.telemetry_path, get(telemetry_handler))
        .route(&transport.history_path, get(history_handler));

    let base = transport.base_path.trim_end_matches('/');
    let router = if base.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(base, api)
    };

    router
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    if state.hub.spawn_sweeper().is_none() {
        info!("Idle sweeping disabled");
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let base = config.transport.base_path.trim_end_matches('/');
    info!("Vigil server listening on {}", addr);
    info!("Chat endpoint: ws://{}{}{}", addr, base, config.transport.chat_path);
    info!("Monitor endpoint: ws://{}{}{}", addr, base, config.transport.monitor_path);
    info!("Telemetry endpoint: ws://{}{}{}", addr, base, config.transport.telemetry_path);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    metrics::record_stats(&stats);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": stats,
    }))
}

/// Chat history between the caller and `other_id`.
async fn history_handler(
    Path(other_id): Path<String>,
    Query(query): Query<TokenQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let participant = match state.hub.gate().authenticate(query.token.as_deref()).await {
        Ok(participant) => participant,
        Err(e) => {
            warn!(error = %e, "History request rejected");
            return detail(StatusCode::UNAUTHORIZED, e.to_string());
        }
    };

    let other_id = ParticipantId::new(other_id);
    match state.hub.router().get_history(&participant.id, &other_id).await {
        Ok(history) => {
            debug!(
                participant = %participant.id,
                other = %other_id,
                messages = history.len(),
                "History served"
            );
            Json(history).into_response()
        }
        Err(e) => {
            error!(participant = %participant.id, other = %other_id, error = %e, "History query failed");
            detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load chat history".to_string(),
            )
        }
    }
}

fn detail(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "detail": message }))).into_response()
}

/// Chat WebSocket upgrade handler.
async fn chat_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new("chat");
            let mut conn = Metered::new(WebSocketConnection::new(socket, Some(addr)), "chat");
            let result = state.hub.serve_chat(&mut conn, query.token.as_deref()).await;
            finish("chat", &state, result);
        })
}

/// Monitor WebSocket upgrade handler.
async fn monitor_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<TokenQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new("monitor");
            let mut conn = Metered::new(WebSocketConnection::new(socket, Some(addr)), "monitor");
            let result = state
                .hub
                .serve_monitor(&mut conn, &session_id, query.token.as_deref())
                .await;
            finish("monitor", &state, result);
        })
}

/// Telemetry WebSocket upgrade handler.
async fn telemetry_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new("telemetry");
            let mut conn =
                Metered::new(WebSocketConnection::new(socket, Some(addr)), "telemetry");
            let result = state
                .hub
                .serve_telemetry(&mut conn, query.token.as_deref())
                .await;
            finish("telemetry", &state, result);
        })
}

/// Record how a connection ended.
fn finish(channel: &'static str, state: &AppState, result: Result<(), Error>) {
    match result {
        Ok(()) => {}
        Err(e) if e.close_frame().is_some() => metrics::record_rejection(channel, e.kind()),
        Err(e) => debug!(channel, error = %e, "Connection ended with error"),
    }
    metrics::record_stats(&state.hub.stats());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialEntry, SessionEntry};
    use axum::body::to_bytes;
    use vigil_core::Participant;
    use vigil_protocol::{ChatMessage, Role};

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.directory.credentials = vec![
            CredentialEntry {
                token: "doc".into(),
                id: "d-1".into(),
                role: Role::Supervisor,
                display_name: None,
            },
            CredentialEntry {
                token: "pat".into(),
                id: "p-1".into(),
                role: Role::Monitored,
                display_name: None,
            },
        ];
        config.directory.sessions = vec![SessionEntry {
            id: "s-1".into(),
            monitored_id: "p-1".into(),
            monitored_name: None,
        }];
        Arc::new(AppState::new(config))
    }

    fn token(value: &str) -> Query<TokenQuery> {
        Query(TokenQuery {
            token: Some(value.to_string()),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_history_requires_credential() {
        let response = history_handler(
            Path("p-1".to_string()),
            Query(TokenQuery::default()),
            State(state()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await["detail"],
            "Authentication required"
        );

        let forged = history_handler(Path("p-1".to_string()), token("forged"), State(state())).await;
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_history_returns_conversation_in_order() {
        let state = state();
        let doctor = Participant::new("d-1", Role::Supervisor);
        let patient = Participant::new("p-1", Role::Monitored);
        let router = state.hub.router();

        router
            .handle_inbound(&doctor, r#"{"recipient_id":"p-1","content":"first"}"#)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        router
            .handle_inbound(&patient, r#"{"recipient_id":"d-1","content":"second"}"#)
            .await
            .unwrap();

        let response =
            history_handler(Path("p-1".to_string()), token("doc"), State(Arc::clone(&state))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let history: Vec<ChatMessage> = serde_json::from_value(body_json(response).await).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_health_reports_stats() {
        let response = health_handler(State(state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["stats"]["sessions"], 0);
    }

    #[test]
    fn test_app_builds_with_custom_base_path() {
        let mut config = Config::default();
        config.transport.base_path = "/".into();
        let _ = app(Arc::new(AppState::new(config)));
        let _ = app(state());
    }
}
