//! HTTP server for the image cache
//!
//! Provides /health, /info, POST /requests and GET /image/{id}.

use crate::engine::CacheEngine;
use crate::error::CacheError;
use crate::types::{
    ArtifactResult, CacheInfo, EntryInfo, ErrorResponse, HealthResponse, ImageId, SubmitRequest,
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub engine: CacheEngine,
    /// Upper bound for the `wait` parameter of `GET /image/{id}`
    pub wait_ceiling: Duration,
    /// Suggested client back-off for pending entries
    pub retry_after: Duration,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(engine: CacheEngine, wait_ceiling: Duration, retry_after: Duration) -> Self {
        Self {
            engine,
            wait_ceiling,
            retry_after,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Errors returned by the HTTP handlers
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest { loc: serde_json::Value, msg: String },
    NotFound(String),
    Upstream { id: String, status: u16, message: String },
    Pending { id: String, retry_after: Duration },
    Unavailable { loc: serde_json::Value, msg: String },
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = |error_type: &str, loc: serde_json::Value, msg: String| {
            Json(ErrorResponse {
                error_type: error_type.to_string(),
                loc,
                msg,
            })
        };

        match self {
            ApiError::InvalidRequest { loc, msg } => (
                StatusCode::BAD_REQUEST,
                body("invalid request", loc, msg),
            )
                .into_response(),
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                body("not found", json!(id), "Image not found".to_string()),
            )
                .into_response(),
            ApiError::Upstream {
                id,
                status,
                message,
            } => {
                let status = StatusCode::from_u16(status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                (status, body("upstream error", json!(id), message)).into_response()
            }
            ApiError::Pending { id, retry_after } => (
                StatusCode::REQUEST_TIMEOUT,
                [(
                    header::RETRY_AFTER,
                    retry_after.as_secs().max(1).to_string(),
                )],
                body("pending", json!(id), "Image not ready yet".to_string()),
            )
                .into_response(),
            ApiError::Unavailable { loc, msg } => {
                error!(error = %msg, "Storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    body("storage error", loc, "Storage unavailable".to_string()),
                )
                    .into_response()
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body("internal error", json!(null), "Internal server error".to_string()),
                )
                    .into_response()
            }
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidRequest(msg) => ApiError::InvalidRequest {
                loc: json!(["body"]),
                msg,
            },
            CacheError::Storage(e) => ApiError::Unavailable {
                loc: json!(["body"]),
                msg: e.to_string(),
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/requests", post(submit))
        .route("/image/{id}", get(get_image))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        in_flight: state.engine.in_flight(),
        cache: state.engine.stats().await,
    })
}

/// Cache statistics and the list of live entries
async fn info(State(state): State<SharedState>) -> Json<CacheInfo> {
    let now = Utc::now();
    let stats = state.engine.stats().await;
    let mut entries: Vec<EntryInfo> = state
        .engine
        .entries()
        .await
        .iter()
        .filter(|summary| !summary.is_expired_at(now))
        .map(|summary| EntryInfo::from_summary(summary, now))
        .collect();
    entries.sort_by(|a, b| a.expiration.cmp(&b.expiration).then_with(|| a.id.cmp(&b.id)));

    Json(CacheInfo {
        active_count: stats.active,
        pending_count: stats.pending,
        failed_count: stats.failed,
        total_bytes: stats.total_bytes,
        entries,
    })
}

/// Register a chart query and return its identifier
async fn submit(
    State(state): State<SharedState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<ImageId>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::InvalidRequest {
        loc: json!(["body"]),
        msg: rejection.body_text(),
    })?;

    let query = request.api_query.ok_or_else(|| ApiError::InvalidRequest {
        loc: json!(["body", "api_query"]),
        msg: "Incomplete request, missing 'api_query'".to_string(),
    })?;
    if request.ttl == Some(0) {
        return Err(ApiError::InvalidRequest {
            loc: json!(["body", "ttl"]),
            msg: "ttl must be a positive number of seconds".to_string(),
        });
    }

    let id = state
        .engine
        .submit(query, request.ttl.map(Duration::from_secs))
        .await?;
    Ok(Json(ImageId { id }))
}

#[derive(Debug, Deserialize)]
struct ImageParams {
    /// Seconds to wait for a pending entry
    wait: Option<f64>,
}

/// Fetch a rendered chart, waiting for it while it is pending
async fn get_image(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    params: Result<Query<ImageParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::InvalidRequest {
        loc: json!(["query", "wait"]),
        msg: rejection.body_text(),
    })?;

    // The expiry is part of the identifier; anything that does not carry one
    // cannot name an entry.
    let Some(expires_at) = entry_store::parse_expiry(&id) else {
        warn!(id = %id, "Malformed image id");
        return Err(ApiError::NotFound(id));
    };

    let wait = params
        .wait
        .filter(|w| w.is_finite() && *w >= 0.0)
        .and_then(|w| Duration::try_from_secs_f64(w).ok())
        .map_or(state.wait_ceiling, |w| w.min(state.wait_ceiling));

    match state.engine.get(&id, wait).await {
        ArtifactResult::Success { content_type, data } => {
            let max_age = (expires_at - Utc::now()).num_seconds().max(0);
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CACHE_CONTROL, format!("public, max-age={}", max_age)),
                ],
                data,
            )
                .into_response())
        }
        ArtifactResult::UpstreamError { status, message } => Err(ApiError::Upstream {
            id,
            status,
            message,
        }),
        ArtifactResult::StillPending => Err(ApiError::Pending {
            id,
            retry_after: state.retry_after,
        }),
        ArtifactResult::NotFound => Err(ApiError::NotFound(id)),
        ArtifactResult::Unavailable(msg) => Err(ApiError::Unavailable {
            loc: json!(id),
            msg,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine_with, png, ScriptedRenderer};
    use axum::body::Body;
    use axum::http::Request;
    use kentik_chart_client::RenderError;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    async fn router_with(renderer: Arc<ScriptedRenderer>) -> (Router, TempDir) {
        let dir = tempdir().unwrap();
        let engine = engine_with(dir.path(), renderer).await;
        let state = Arc::new(ServerState::new(
            engine,
            Duration::from_secs(5),
            Duration::from_secs(3),
        ));
        (create_router(state), dir)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn submit_query(router: &Router) -> String {
        let response = router
            .clone()
            .oneshot(post_json(
                "/requests",
                r#"{"api_query": {"queries": [{"metric": "bytes"}]}, "ttl": 300}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;

        let response = router.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["cache"]["entries"], 0);
    }

    #[tokio::test]
    async fn test_submit_then_fetch_image() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;
        let id = submit_query(&router).await;
        assert!(entry_store::parse_expiry(&id).is_some());

        let response = router
            .clone()
            .oneshot(get(&format!("/image/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let cache_control = response.headers()[header::CACHE_CONTROL].to_str().unwrap();
        assert!(cache_control.starts_with("public, max-age="));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), png().data.as_slice());
    }

    #[tokio::test]
    async fn test_submit_missing_query_is_rejected() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;

        for body in [r#"{"ttl": 60}"#, r#"{"api_query": null}"#] {
            let response = router.clone().oneshot(post_json("/requests", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let json = body_json(response).await;
            assert_eq!(json["type"], "invalid request");
            assert_eq!(json["loc"], json!(["body", "api_query"]));
            assert_eq!(json["msg"], "Incomplete request, missing 'api_query'");
        }
    }

    #[tokio::test]
    async fn test_submit_zero_ttl_is_rejected() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;

        let response = router
            .oneshot(post_json("/requests", r#"{"api_query": {"q": 1}, "ttl": 0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["loc"], json!(["body", "ttl"]));
    }

    #[tokio::test]
    async fn test_submit_malformed_body_is_rejected() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;

        let response = router
            .oneshot(post_json("/requests", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "invalid request");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_are_not_found() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;
        let unknown = format!("{}_{}.000000", "a".repeat(64), Utc::now().timestamp() + 600);

        for id in [unknown.as_str(), "not-an-id", "abc_123.0"] {
            let response = router
                .clone()
                .oneshot(get(&format!("/image/{}?wait=0", id)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "id {}", id);
            assert_eq!(body_json(response).await["type"], "not found");
        }
    }

    #[tokio::test]
    async fn test_upstream_failure_is_surfaced() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::failing(
            RenderError::permanent(400, "Invalid query"),
        )))
        .await;
        let id = submit_query(&router).await;

        let response = router
            .oneshot(get(&format!("/image/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["type"], "upstream error");
        assert_eq!(json["loc"], json!(id));
        assert_eq!(json["msg"], "Invalid query");
    }

    #[tokio::test]
    async fn test_pending_image_times_out_with_retry_after() {
        let renderer = Arc::new(ScriptedRenderer::succeeding().gated());
        let (router, _dir) = router_with(renderer.clone()).await;
        let id = submit_query(&router).await;

        let response = router
            .clone()
            .oneshot(get(&format!("/image/{}?wait=0.1", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
        assert_eq!(body_json(response).await["type"], "pending");

        renderer.release(1);
        let response = router
            .oneshot(get(&format!("/image/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_wait_is_rejected() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;
        let id = submit_query(&router).await;

        let response = router
            .oneshot(get(&format!("/image/{}?wait=abc", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["type"], "invalid request");
        assert_eq!(json["loc"], json!(["query", "wait"]));
    }

    #[tokio::test]
    async fn test_huge_wait_is_capped() {
        let (router, _dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;
        let id = submit_query(&router).await;

        let response = router
            .oneshot(get(&format!("/image/{}?wait=1e300", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unreadable_record_is_service_unavailable() {
        let (router, dir) = router_with(Arc::new(ScriptedRenderer::succeeding())).await;
        let id = submit_query(&router).await;
        let response = router
            .clone()
            .oneshot(get(&format!("/image/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        std::fs::write(
            dir.path().join("entries").join(format!("{}.entry", id)),
            b"garbage",
        )
        .unwrap();

        let response = router
            .oneshot(get(&format!("/image/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["type"], "storage error");
    }

    #[tokio::test]
    async fn test_info_lists_entries() {
        let renderer = Arc::new(ScriptedRenderer::succeeding().gated());
        let (router, _dir) = router_with(renderer.clone()).await;
        let id = submit_query(&router).await;

        let response = router.clone().oneshot(get("/info")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["pending_count"], 1);
        assert_eq!(json["active_count"], 0);
        assert_eq!(json["entries"][0]["id"], json!(id));
        assert_eq!(json["entries"][0]["state"], "pending");
        renderer.release(1);
    }

    #[test]
    fn test_invalid_upstream_status_maps_to_bad_gateway() {
        let response = ApiError::Upstream {
            id: "x".to_string(),
            status: 200,
            message: "odd".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = ApiError::Upstream {
            id: "x".to_string(),
            status: 1000,
            message: "odd".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_storage_error_maps_to_unavailable() {
        let err = ApiError::from(CacheError::Storage(entry_store::StoreError::Corrupt(
            "bad header".to_string(),
        )));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
