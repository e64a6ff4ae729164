//! HTTP ingress for call lifecycle events.
use crate::{app::AppState, event::CallEvent, version};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{debug, warn};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", post(post_event))
        .route("/health", get(health))
}

async fn post_event(State(state): State<AppState>, Json(event): Json<CallEvent>) -> Response {
    let call_id = event.call_id().to_string();
    let kind = event.kind();
    match state.sender.send(event) {
        Ok(()) => {
            debug!(call_id = %call_id, event = kind, "event accepted");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "accepted": true, "call_id": call_id, "event": kind })),
            )
                .into_response()
        }
        Err(_) => {
            warn!(call_id = %call_id, event = kind, "event dispatch is not running");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "accepted": false, "error": "event dispatch is not running" })),
            )
                .into_response()
        }
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let pool = &state.context.pool;
    Json(json!({
        "status": "ok",
        "version": version::get_short_version(),
        "uptime_secs": state.uptime().num_seconds(),
        "active_calls": state.stats.active_calls(),
        "total_calls": state.stats.total_calls(),
        "ignored_events": state.stats.ignored_events(),
        "workers": pool.size(),
        "idle_workers": pool.idle_workers(),
        "active_queues": pool.active_queues(),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, AppStateBuilder};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> App {
        AppStateBuilder::new().build().unwrap()
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/events")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_event_is_forwarded() {
        let App { state, mut receiver } = app();
        let response = router()
            .with_state(state)
            .oneshot(post(
                r#"{"event":"call_started","call_id":"1700000000.12","caller_id":"555"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["call_id"], "1700000000.12");

        assert_eq!(
            receiver.try_recv().unwrap(),
            CallEvent::CallStarted {
                call_id: "1700000000.12".to_string(),
                caller_id: "555".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_post_event_without_dispatch() {
        let App { state, receiver } = app();
        drop(receiver);
        let response = router()
            .with_state(state)
            .oneshot(post(r#"{"event":"call_ended","call_id":"1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_post_malformed_event() {
        let App { state, mut receiver } = app();
        let response = router()
            .with_state(state)
            .oneshot(post(r#"{"event":"call_parked","call_id":"1"}"#))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_health() {
        let App { state, .. } = app();
        let response = router()
            .with_state(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_calls"], 0);
        assert_eq!(body["workers"], 10);
    }
}
