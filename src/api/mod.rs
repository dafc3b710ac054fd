//! HTTP API for manual switch control
//!
//! `PUT /virtualSwitch` accepts a bank control message in the same shape as
//! PGN 127502 and applies it through the engine. Read-only status routes sit
//! under `/api`.
//! Default port: 3040

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::protocol::Translator;
use crate::state::{ChannelView, EngineHandle};

/// Default API port
pub const DEFAULT_API_PORT: u16 = 3040;

/// Appended to every rejection so callers see the expected body
const USAGE_HINT: &str = r#"Must include object for the 127502 PGN. ex. {"pgn":127502,"fields":{"Switch Bank Instance": 107, "Switch1": "On"}}"#;

/// Shared state for API handlers
pub struct ApiState {
    pub engine: EngineHandle,
    pub translator: Translator,
}

/// Switch bank status
#[derive(Debug, Serialize)]
pub struct SwitchesResponse {
    pub instance: u8,
    pub channels: Vec<ChannelView>,
}

/// API error response (plain text)
#[derive(Debug)]
enum ApiError {
    Invalid(String),
    Unavailable,
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Closed => ApiError::Unavailable,
            other => ApiError::Invalid(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Invalid(reason) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid Request. {}. {}", reason, USAGE_HINT),
            )
                .into_response(),
            ApiError::Unavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "Switch bank is shutting down").into_response()
            }
        }
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/virtualSwitch", put(put_virtual_switch))
        .route("/api/switches", get(list_switches))
        .route("/api/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// PUT /virtualSwitch - Apply a manual control message
async fn put_virtual_switch(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<String, ApiError> {
    // Anything that is not JSON counts as a missing body
    let body: Option<Value> = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };
    debug!(?body, "Manual control request");

    let request = state
        .translator
        .from_manual(body.as_ref())
        .map_err(|e| {
            warn!("Rejected manual request: {}", e);
            ApiError::Invalid(e.to_string())
        })?;

    let (instance, channel, on) = (request.instance, request.channel, request.on);
    state.engine.apply(request).await.map_err(|e| {
        warn!(channel, "Manual request not applied: {}", e);
        ApiError::from(e)
    })?;

    let verb = if on { "on" } else { "off" };
    info!(instance, channel, "Switch{} switched {} via HTTP", channel, verb);

    Ok(format!("Instance {} Switch{} switched {}", instance, channel, verb))
}

/// GET /api/switches - Every enabled channel with its state
async fn list_switches(State(state): State<Arc<ApiState>>) -> Json<SwitchesResponse> {
    Json(SwitchesResponse {
        instance: state.translator.instance(),
        channels: state.engine.channels().await,
    })
}

/// GET /api/health - Health check endpoint
async fn health_check(State(state): State<Arc<ApiState>>) -> Response {
    if state.engine.is_alive() {
        "ok".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stopped").into_response()
    }
}

/// Start the API server
pub async fn start_server(state: Arc<ApiState>, port: u16) -> Result<()> {
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting switch API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryBus, MemoryDataModel, Outbound};
    use crate::protocol::LabelTable;
    use crate::state::{
        ChannelConfig, EngineSettings, PersistenceActor, PowerState, SnapshotFile, StateEngine,
        SwitchState, NUM_CHANNELS,
    };
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        engine: EngineHandle,
        bus: MemoryBus,
        _temp: TempDir,
    }

    fn start() -> Harness {
        let temp = tempdir().unwrap();
        let persistence = PersistenceActor::spawn(SnapshotFile::in_dir(temp.path()), 0);
        let mut configs: Vec<ChannelConfig> = (1..=NUM_CHANNELS).map(ChannelConfig::with_defaults).collect();
        configs[27].enabled = false;
        let translator = Translator::new(107, LabelTable::from_configs(&configs));

        let bus = MemoryBus::new();
        let outbound = Arc::new(Outbound::new(
            Arc::new(bus.clone()),
            Arc::new(MemoryDataModel::new()),
        ));
        let engine = StateEngine::spawn(
            EngineSettings {
                send_rate: Duration::from_secs(15),
                state_ttl_secs: 60,
                source: "test".to_string(),
            },
            translator.clone(),
            &configs,
            &PowerState::new(),
            outbound,
            persistence,
        );

        let router = build_router(Arc::new(ApiState {
            engine: engine.clone(),
            translator,
        }));

        Harness {
            router,
            engine,
            bus,
            _temp: temp,
        }
    }

    async fn put_json(router: &Router, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("PUT")
            .uri("/virtualSwitch")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn state_of(engine: &EngineHandle, channel: u8) -> SwitchState {
        engine
            .channels()
            .await
            .into_iter()
            .find(|c| c.index == channel)
            .map(|c| c.state)
            .unwrap()
    }

    #[tokio::test]
    async fn test_switch_on() {
        let h = start();
        let body = json!({"pgn": 127502, "fields": {"Switch Bank Instance": 107, "Switch3": "On"}});

        let (status, text) = put_json(&h.router, &body.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "Instance 107 Switch3 switched on");
        assert_eq!(state_of(&h.engine, 3).await, SwitchState::On);
        assert_eq!(h.bus.emitted().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_instance_rejected_without_side_effects() {
        let h = start();
        let body = json!({"pgn": 127502, "fields": {"Switch Bank Instance": 12, "Switch3": "On"}});

        let (status, text) = put_json(&h.router, &body.to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.starts_with("Invalid Request. "));
        assert!(text.contains("instance 12"));
        assert!(text.ends_with(USAGE_HINT));
        assert_eq!(state_of(&h.engine, 3).await, SwitchState::Off);
        assert!(h.bus.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_malformed_bodies() {
        let h = start();

        let (status, _) = put_json(&h.router, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = put_json(&h.router, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body = json!({"pgn": 127501, "fields": {"Switch Bank Instance": 107, "Switch1": "On"}});
        let (status, text) = put_json(&h.router, &body.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.contains("127501"));

        assert!(h.bus.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_channel_rejected() {
        let h = start();
        let body = json!({"pgn": 127502, "fields": {"Switch Bank Instance": 107, "Switch28": "On"}});

        let (status, text) = put_json(&h.router, &body.to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.contains("channel 28"));
    }

    #[tokio::test]
    async fn test_list_switches() {
        let h = start();
        let body = json!({"pgn": 127502, "fields": {"Switch Bank Instance": 107, "Switch2": "off"}});
        put_json(&h.router, &body.to_string()).await;

        let request = Request::builder()
            .uri("/api/switches")
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["instance"], json!(107));
        let channels = value["channels"].as_array().unwrap();
        assert_eq!(channels.len(), 27);
        assert_eq!(channels[1]["index"], json!(2));
    }

    #[tokio::test]
    async fn test_health() {
        let h = start();
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        h.engine.shutdown().await;
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
