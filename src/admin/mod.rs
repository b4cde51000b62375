//! Read-only admin API.
//!
//! ```text
//! GET /admin/status    version, strategy, live handlers
//! GET /admin/backends  per-backend connection state and virtual finish time
//! ```
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::ShutdownSignal;
use crate::load_balancer::BackendRegistry;
use crate::net::ConnectionTracker;

/// Shared state for admin handlers.
#[derive(Debug, Clone)]
pub struct AdminState {
    pub registry: Arc<BackendRegistry>,
    pub tracker: ConnectionTracker,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(registry: Arc<BackendRegistry>, tracker: ConnectionTracker, api_key: String) -> Self {
        Self {
            registry,
            tracker,
            api_key: api_key.into(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve(listener: TcpListener, state: AdminState, mut shutdown: ShutdownSignal) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, SchedulingStrategy};
    use crate::load_balancer::Role;
    use crate::resilience::TimeoutPolicy;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AdminState {
        let configs = vec![
            BackendConfig { name: "serv1".into(), role: Role::Video, address: "127.0.0.1:7101".into() },
            BackendConfig { name: "serv3".into(), role: Role::Music, address: "127.0.0.1:7103".into() },
        ];
        let registry =
            BackendRegistry::from_config(&configs, SchedulingStrategy::VirtualFinish, TimeoutPolicy::default())
                .unwrap();
        AdminState::new(Arc::new(registry), ConnectionTracker::new(), "s3cret".into())
    }

    fn get(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn requires_bearer_token() {
        let app = setup_admin_router(state());

        let res = app.clone().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.oneshot(get("/admin/status", Some("wrong"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_backends() {
        let app = setup_admin_router(state());
        let res = app.oneshot(get("/admin/backends", Some("s3cret"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body = to_bytes(res.into_body(), 64 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let backends = json.as_array().unwrap();
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[1]["name"], "serv3");
        assert_eq!(backends[1]["role"], "music");
        assert_eq!(backends[1]["connected"], false);
    }

    #[tokio::test]
    async fn status_reports_strategy() {
        let app = setup_admin_router(state());
        let res = app.oneshot(get("/admin/status", Some("s3cret"))).await.unwrap();
        let body = to_bytes(res.into_body(), 64 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["strategy"], "virtual_finish");
        assert_eq!(json["active_connections"], 0);
    }
}
