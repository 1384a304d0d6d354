//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::server::state::ServerState;
use crate::utils::{create_run_id, suffix_run_id, version_info};

/// Envelope shared by all API responses
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub ret: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ret: "ok",
            message: message.into(),
            id: None,
            data: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ret: "fail",
            message: message.into(),
            id: None,
            data: None,
        }
    }
}

const START_BODY_HINT: &str = "Invalid request body. Example of a request: \
    {\"start\": 60, \"stop\": 120, \"interval\": 60}.";

/// Validated parameters of a start request
struct StartParams {
    start: u64,
    stop: u64,
    interval: u64,
    id: Option<String>,
}

fn parse_start_body(body: &Value) -> Option<StartParams> {
    let start = body.get("start")?.as_i64()?;
    let stop = body.get("stop")?.as_i64()?;
    let interval = body.get("interval")?.as_i64()?;
    if start < 0 || stop <= 0 || interval <= 0 {
        return None;
    }
    let id = match body.get("id") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_str()?.to_string()),
    };
    Some(StartParams {
        start: start as u64,
        stop: stop as u64,
        interval: interval as u64,
        id,
    })
}

/// Start a collection run
pub async fn start_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> impl IntoResponse {
    let params = serde_json::from_slice::<Value>(&body)
        .ok()
        .as_ref()
        .and_then(parse_start_body);
    let Some(params) = params else {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::fail(START_BODY_HINT)));
    };

    let run_id = match &params.id {
        Some(id) => suffix_run_id(id),
        None => create_run_id(),
    };

    match state
        .registry
        .start_run(params.start, params.stop, params.interval, run_id.clone())
        .await
    {
        Ok(()) => {
            let mut response =
                ApiResponse::ok("Parameters for starting the collector received.");
            response.id = Some(run_id);
            (StatusCode::OK, Json(response))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::fail(format!("Failed to start collector: {}", e))),
        ),
    }
}

/// Stop a collection run by id
pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> impl IntoResponse {
    let body = serde_json::from_slice::<Value>(&body).ok();
    let run_id = body
        .as_ref()
        .and_then(|body| body.get("id"))
        .and_then(Value::as_str);
    let Some(run_id) = run_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::fail("Invalid request body. Expected: {\"id\": \"<run_id>\"}.")),
        );
    };

    if state.registry.stop_run(run_id).await {
        (StatusCode::OK, Json(ApiResponse::ok("Collector has been stopped.")))
    } else {
        (
            StatusCode::OK,
            Json(ApiResponse::fail(
                "Instance of agent does not exist for current ID",
            )),
        )
    }
}

/// List persisted collection runs
pub async fn collections_handler(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    match state.registry.collection_names().await {
        Ok(names) => {
            let mut response = ApiResponse::ok("Names of collections retrieved successfully.");
            response.data = Some(Value::from(names));
            (StatusCode::OK, Json(response))
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::fail("Failed to retrieve collection names.")),
        ),
    }
}

/// Records for one host of one run
pub async fn collection_results_handler(
    State(state): State<Arc<ServerState>>,
    Path((run_id, host)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.registry.collection_results(&run_id, &host).await {
        Ok(records) => {
            let mut response =
                ApiResponse::ok("Results for collection retrieved successfully.");
            response.data = Some(Value::from(records));
            (StatusCode::OK, Json(response))
        }
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::fail("Failed to retrieve results for the run ID.")),
        ),
    }
}

/// Service banner
pub async fn index_handler() -> impl IntoResponse {
    "fleetprobe collector API"
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fleetprobe".to_string(),
        version: version.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start_body_accepts_valid_request() {
        let params =
            parse_start_body(&json!({"start": 60, "stop": 120, "interval": 60})).unwrap();
        assert_eq!(params.start, 60);
        assert_eq!(params.stop, 120);
        assert_eq!(params.interval, 60);
        assert!(params.id.is_none());
    }

    #[test]
    fn test_parse_start_body_rejects_bad_values() {
        assert!(parse_start_body(&json!({"start": -1, "stop": 120, "interval": 60})).is_none());
        assert!(parse_start_body(&json!({"start": 0, "stop": 0, "interval": 60})).is_none());
        assert!(parse_start_body(&json!({"start": 0, "stop": 120, "interval": 0})).is_none());
        assert!(parse_start_body(&json!({"stop": 120, "interval": 60})).is_none());
        assert!(parse_start_body(&json!({"start": "x", "stop": 120, "interval": 60})).is_none());
        assert!(
            parse_start_body(&json!({"start": 0, "stop": 120, "interval": 60, "id": 5}))
                .is_none()
        );
    }

    #[test]
    fn test_parse_start_body_keeps_client_id() {
        let params =
            parse_start_body(&json!({"start": 0, "stop": 5, "interval": 2, "id": "bench"}))
                .unwrap();
        assert_eq!(params.id.as_deref(), Some("bench"));
    }
}
