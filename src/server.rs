//! HTTP surface: `POST /query` with `{"query": "<SQL>"}`
//!
//! Configuration is looked up again for every request, so a rotated key or a fixed
//! environment takes effect without a restart.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::{GatewayError, SqlGateway};

/// Where the gateway reads its configuration from
pub type ConfigLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Read configuration from the process environment
pub fn env_lookup() -> ConfigLookup {
    Arc::new(|name: &str| std::env::var(name).ok())
}

#[derive(Clone)]
struct AppState {
    lookup: ConfigLookup,
}

pub fn router(lookup: ConfigLookup) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/query", post(query_handler))
        .with_state(AppState { lookup })
}

async fn query_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let sql = match parse_query(&body) {
        Ok(sql) => sql,
        Err(message) => {
            log::debug!("Rejecting request: {message}");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };

    let gateway = match SqlGateway::from_lookup(state.lookup.as_ref()) {
        Ok(gateway) => gateway,
        Err(e) => return error_response(e),
    };
    match gateway.prepare(&sql).query().await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(e),
    }
}

fn parse_query(body: &[u8]) -> Result<String, String> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| format!("request body must be a JSON object: {e}"))?;
    match payload.get("query") {
        Some(Value::String(sql)) if !sql.trim().is_empty() => Ok(sql.clone()),
        Some(Value::String(_)) => Err("query must not be empty".to_owned()),
        Some(_) => Err("query must be a string".to_owned()),
        None => Err("missing query".to_owned()),
    }
}

fn error_response(e: GatewayError) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        log::error!("Query failed: {e}");
    }
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
