//! Dashboard — Axum control API for operators.
//!
//! Exposes the engine's outward surface (status, positions, history,
//! start/stop, manual entry) plus a manual tick trigger as JSON endpoints.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use routes::AppState;

/// Bind the control API and serve it on a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route(
            "/api/positions",
            get(routes::get_positions).post(routes::post_position),
        )
        .route("/api/history", get(routes::get_history))
        .route("/api/start", post(routes::post_start))
        .route("/api/stop", post(routes::post_stop))
        .route("/api/tick", post(routes::post_tick))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::sources::StaticSource;
    use crate::storage::MemoryStore;
    use crate::types::{Opportunity, Position};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state(opportunities: Vec<Opportunity>) -> AppState {
        Arc::new(Engine::new(
            EngineConfig::default(),
            Arc::new(StaticSource::new(opportunities)),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
        ))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, json: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state(vec![]));
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = build_router(test_state(vec![]));
        let resp = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["running"], false);
        assert_eq!(json["open_count"], 0);
        assert_eq!(json["config"]["max_open_positions"], 10);
    }

    #[tokio::test]
    async fn test_manual_entry_created() {
        let app = build_router(test_state(vec![]));
        let opp = Opportunity::sample("pool-9", 0.45);
        let resp = app
            .clone()
            .oneshot(post_json("/api/positions", serde_json::to_string(&opp).unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let position: Position = serde_json::from_value(body_json(resp).await).unwrap();
        assert_eq!(position.opportunity_id, "pool-9");

        let resp = app
            .oneshot(Request::builder().uri("/api/positions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_entry_policy_violation() {
        let app = build_router(test_state(vec![]));
        let opp = Opportunity::sample("pool-9", 0.20);
        let resp = app
            .oneshot(post_json("/api/positions", serde_json::to_string(&opp).unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["kind"], "yield_below_threshold");
    }

    #[tokio::test]
    async fn test_manual_entry_bad_body() {
        let app = build_router(test_state(vec![]));
        let resp = app
            .oneshot(post_json("/api/positions", "{\"id\": 3}".into()))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_tick_endpoint() {
        let app = build_router(test_state(vec![Opportunity::sample("a", 0.45)]));
        let resp = app
            .clone()
            .oneshot(post_json("/api/tick", String::new()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["opened"].as_array().unwrap().len(), 1);

        let resp = app
            .oneshot(Request::builder().uri("/api/history").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_endpoints() {
        let state = test_state(vec![]);
        let app = build_router(state.clone());

        let resp = app
            .clone()
            .oneshot(post_json("/api/start", String::new()))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["running"], true);

        let resp = app.oneshot(post_json("/api/stop", String::new())).await.unwrap();
        assert_eq!(body_json(resp).await["running"], false);
        assert!(!state.is_running().await);
    }
}
