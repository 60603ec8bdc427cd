use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{header, HeaderMap},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws_connection::WebSocketConnection;

/// 会话令牌所在的 cookie 名
const SESSION_COOKIE: &str = "jwt";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    online_users: usize,
    connections: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    Json(HealthResponse {
        status: "ok",
        online_users: registry.online_count(),
        connections: registry.connection_count(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// 依次从 Authorization 头、`token` 查询参数、`jwt` cookie 中提取凭证
fn extract_credential(headers: &HeaderMap, query: &WsQuery) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.trim().is_empty())
        .map(str::to_string);

    let from_cookie = || {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.to_string())
    };

    let from_query = || {
        query
            .token
            .clone()
            .filter(|token| !token.trim().is_empty())
    };

    from_header.or_else(from_query).or_else(from_cookie)
}

/// 握手在升级之前完成：认证失败直接返回 401，不建立 WebSocket
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let credential = extract_credential(&headers, &query).unwrap_or_default();
    let (session, outbound) = state.hub.connect(&credential).await?;

    let connection_id = session.connection_id();
    let hub = state.hub.clone();
    let connection = WebSocketConnection::new(state, session, outbound);

    Ok(ws
        .on_failed_upgrade(move |err| {
            tracing::warn!(connection_id = %connection_id, error = %err, "WebSocket 升级失败");
            tokio::spawn(async move { hub.release(connection_id).await });
        })
        .on_upgrade(move |socket| connection.run(socket)))
}
