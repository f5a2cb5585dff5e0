use crate::infra::AppState;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use donation_swap::swap::CommandContext;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub(crate) struct CommandRequest {
    pub(crate) command: String,
    #[serde(default)]
    pub(crate) args: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdminCommandRequest {
    pub(crate) session: String,
    pub(crate) command: String,
    #[serde(default)]
    pub(crate) args: Value,
}

pub(crate) fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route("/api/v1/swap", axum::routing::post(swap_endpoint))
        .route("/api/v1/swap/admin", axum::routing::post(admin_endpoint))
        .layer(Extension(state))
}

pub(crate) async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// First hop of `x-forwarded-for` when present; the engine only uses the
/// address for captcha checks, geo lookups, and the audit trail.
fn caller_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) async fn swap_endpoint(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CommandRequest>,
) -> Json<Value> {
    let ctx = CommandContext {
        caller_ip: caller_ip(&headers),
    };
    let (success, result) =
        state
            .engine_commands
            .dispatch(&state.engine, &ctx, &payload.command, payload.args);
    Json(json!({ "success": success, "result": result }))
}

pub(crate) async fn admin_endpoint(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AdminCommandRequest>,
) -> Json<Value> {
    let ctx = CommandContext {
        caller_ip: caller_ip(&headers),
    };
    let (success, result) = state.admin_commands.dispatch_admin(
        &state.engine,
        state.admins.as_ref(),
        &payload.session,
        &ctx,
        &payload.command,
        payload.args,
    );
    Json(json!({ "success": success, "result": result }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_admins, build_engine};
    use axum::body::Body;
    use axum::http::Request;
    use donation_swap::config::SwapSettings;
    use donation_swap::swap::{CommandRegistry, TracingMailer};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn settings() -> SwapSettings {
        SwapSettings {
            reference_currency: "NZD".into(),
            contact_recipients: Vec::new(),
            unapproved_match_hours: None,
            delete_after_feedback_days: None,
            admin_session: Some("test-session".into()),
        }
    }

    fn test_state(ready: bool) -> AppState {
        let settings = settings();
        AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(
                PrometheusBuilder::new()
                    .build_recorder()
                    .handle(),
            ),
            engine: Arc::new(build_engine(&settings, Arc::new(TracingMailer), true)),
            admins: Arc::new(build_admins(&settings)),
            engine_commands: Arc::new(CommandRegistry::engine()),
            admin_commands: Arc::new(CommandRegistry::admin()),
        }
    }

    async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request builds"),
            )
            .await
            .expect("request completes");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let value = serde_json::from_slice(&bytes).expect("json body");
        (status, value)
    }

    #[tokio::test]
    async fn healthcheck_returns_ok() {
        let app = router(test_state(true));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("request completes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_reflects_the_flag() {
        let app = router(test_state(false));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("request completes");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn swap_endpoint_dispatches_commands() {
        let app = router(test_state(true));
        let (status, body) = post_json(
            app,
            "/api/v1/swap",
            json!({ "command": "get_info", "args": {} }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["result"]["countries"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn swap_endpoint_reports_failures_without_internals() {
        let app = router(test_state(true));
        let (status, body) = post_json(
            app,
            "/api/v1/swap",
            json!({ "command": "confirm_offer", "args": { "offer_secret": "nope" } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["result"], json!("offer not found"));
    }

    #[tokio::test]
    async fn admin_endpoint_rejects_bad_sessions() {
        let app = router(test_state(true));
        let (_, body) = post_json(
            app,
            "/api/v1/swap/admin",
            json!({ "session": "wrong", "command": "unmatched_offers", "args": {} }),
        )
        .await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["result"], json!("not authorized"));
    }

    #[tokio::test]
    async fn admin_endpoint_accepts_the_configured_session() {
        let app = router(test_state(true));
        let (_, body) = post_json(
            app,
            "/api/v1/swap/admin",
            json!({ "session": "test-session", "command": "unmatched_offers", "args": {} }),
        )
        .await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["result"], json!([]));
    }
}
