//! HTTP API
//!
//! | Method | Path          | Response                                     |
//! |--------|---------------|----------------------------------------------|
//! | POST   | `/runs`       | `202 {"id": "<run>"}`                        |
//! | GET    | `/runs/:id`   | `200` summary (partial while in progress)    |
//! | GET    | `/health`     | `200 {"status":"ok","in_flight":..,..}`      |
//!
//! Errors are returned as `{"error": "<message>"}`.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::CallEngineError;
use crate::report::SummaryReport;
use crate::server::Controller;
use crate::types::RunId;

/// Engine error mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError(pub CallEngineError);

impl From<CallEngineError> for ApiError {
    fn from(e: CallEngineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CallEngineError::InvalidRun(_) | CallEngineError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            CallEngineError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            CallEngineError::UnknownRun(_) => StatusCode::NOT_FOUND,
            CallEngineError::TooManyCalls { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Router over a shared controller
pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/runs", post(submit_run))
        .route("/runs/:id", get(run_status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

async fn submit_run(
    State(controller): State<Arc<Controller>>,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let id = controller.submit_json(&body, None).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "id": id }))))
}

async fn run_status(
    State(controller): State<Arc<Controller>>,
    Path(id): Path<String>,
) -> Result<Json<SummaryReport>, ApiError> {
    let summary = controller.run_status(&RunId::from(id)).await?;
    Ok(Json(summary))
}

async fn health(State(controller): State<Arc<Controller>>) -> Json<serde_json::Value> {
    let stats = controller.stats();
    Json(json!({
        "status": "ok",
        "in_flight": stats.in_flight,
        "queued": stats.queued,
        "active_runs": stats.active_runs,
        "active_batches": stats.active_batches,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessControl;
    use crate::config::EngineConfig;
    use crate::server::ControllerBuilder;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Refuse;

    #[async_trait]
    impl AccessControl for Refuse {
        async fn allow(&self, _ip: &str) -> u16 {
            403
        }
    }

    fn controller(dir: &tempfile::TempDir) -> Arc<Controller> {
        let mut config = EngineConfig::default();
        config.paths.output_dir = dir.path().join("output");
        config.paths.descriptor_dir = dir.path().join("xml");
        config.admission.max_calls = 5;
        Arc::new(
            ControllerBuilder::new()
                .with_config(config)
                .with_access_control(Arc::new(Refuse))
                .build()
                .unwrap(),
        )
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_run(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_path(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_then_status() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&dir);
        let app = router(controller.clone());

        let (status, body) = send(
            app.clone(),
            post_run(r#"{"uuid":"api-run","calls":[{"destination":"x@host:5060","count":3}]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["id"], "api-run");

        let (status, body) = send(app.clone(), get_path("/runs/api-run")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uuid"], "api-run");
        assert_eq!(body["calls"], 0);

        let (status, body) = send(app, get_path("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["in_flight"], 3);
        assert_eq!(body["queued"], 1);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(controller(&dir));

        let (status, body) = send(app.clone(), post_run("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid"));

        let (status, _) = send(app.clone(), post_run(r#"{"calls":[]}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app.clone(),
            post_run(r#"{"uuid":"../../tmp/x","calls":[{"destination":"x@host"}]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app.clone(),
            post_run(r#"{"calls":[{"destination":"x@host","count":6}]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let (status, _) = send(
            app.clone(),
            post_run(r#"{"calls":[{"destination":"x@host","allow":"10.0.0.1"}]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(app, get_path("/runs/nobody")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_run_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(controller(&dir));
        let body = r#"{"uuid":"dup","calls":[{"destination":"x@host"}]}"#;

        let (status, _) = send(app.clone(), post_run(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, _) = send(app, post_run(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
