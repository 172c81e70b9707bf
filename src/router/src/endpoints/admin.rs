//! Admin maintenance endpoints, mounted under `/admin`.

use crate::{AdminRequestError, RouterState};
use axum::{
    Extension, Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use common::auth::AdminPrincipal;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct ClearCacheResponse {
    cleared: usize,
    message: String,
}

pub fn router<S: RouterState>() -> Router<S> {
    Router::new()
        .route("/storage-metrics", get(storage_metrics::<S>))
        .route("/maintenance-jobs", get(maintenance_jobs::<S>))
        .route(
            "/optimization-recommendations",
            get(optimization_recommendations::<S>),
        )
        .route("/manual-cleanup", post(manual_cleanup::<S>))
        .route("/optimize-indexes", post(optimize_indexes::<S>))
        .route("/clear-cache", post(clear_cache::<S>))
}

async fn storage_metrics<S: RouterState>(State(state): State<S>) -> impl IntoResponse {
    Json(state.admin().get_storage_metrics().await)
}

async fn maintenance_jobs<S: RouterState>(State(state): State<S>) -> impl IntoResponse {
    Json(state.admin().get_maintenance_jobs())
}

async fn optimization_recommendations<S: RouterState>(
    State(state): State<S>,
) -> impl IntoResponse {
    Json(state.admin().get_optimization_recommendations().await)
}

async fn manual_cleanup<S: RouterState>(
    State(state): State<S>,
    Extension(principal): Extension<AdminPrincipal>,
) -> Result<impl IntoResponse, AdminRequestError> {
    tracing::info!(principal = %principal.name, "Manual cleanup triggered");
    let summary = state.admin().manual_cleanup().await?;
    Ok(Json(summary))
}

async fn optimize_indexes<S: RouterState>(
    State(state): State<S>,
    Extension(principal): Extension<AdminPrincipal>,
) -> Result<impl IntoResponse, AdminRequestError> {
    tracing::info!(principal = %principal.name, "Index optimization triggered");
    let message = state.admin().optimize_indexes().await?;
    Ok(Json(MessageResponse { message }))
}

async fn clear_cache<S: RouterState>(
    State(state): State<S>,
    Extension(principal): Extension<AdminPrincipal>,
) -> impl IntoResponse {
    tracing::info!(principal = %principal.name, "Cache flush triggered");
    let cleared = state.admin().clear_cache().await;
    Json(ClearCacheResponse {
        cleared,
        message: format!("Cleared {cleared} cached entries"),
    })
}

#[cfg(test)]
mod tests {
    use crate::{AppState, create_router};
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use chrono::{Duration, Utc};
    use common::auth::StaticTokenAuthorizer;
    use common::cache::InMemoryQueryCache;
    use common::config::{CacheConfig, Configuration, Strategy};
    use common::testing::{FakeStore, TestConfigBuilder};
    use maintenance::{
        AdminSurface, MaintenanceEngine, MaintenanceMetrics, MaintenanceScheduler,
        register_standard_jobs,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const DAY: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

    fn app(store: &FakeStore, config: &Configuration) -> axum::Router {
        let cache = Arc::new(InMemoryQueryCache::new(&CacheConfig::default()));
        let engine =
            Arc::new(MaintenanceEngine::new(config, Arc::new(store.clone()), cache).unwrap());
        let mut scheduler =
            MaintenanceScheduler::new(&config.scheduler, MaintenanceMetrics::new()).unwrap();
        register_standard_jobs(&mut scheduler, engine.clone(), &config.scheduler, Utc::now())
            .unwrap();

        let admin = AdminSurface::new(engine, Arc::new(scheduler));
        let authorizer = Arc::new(StaticTokenAuthorizer::new(&config.admin));
        create_router(AppState::new(admin, authorizer))
    }

    fn config() -> Configuration {
        TestConfigBuilder::new()
            .without_defaults()
            .with_policy("audit_logs", 10 * DAY, Strategy::Delete)
            .with_watched_entity("audit_logs")
            .with_admin_token("admin-secret")
            .with_token("reader-secret", "reader", false)
            .build()
    }

    fn seeded_store() -> FakeStore {
        let store = FakeStore::new();
        let now = Utc::now();
        store.insert_rows(
            "audit_logs",
            (0..30).map(|d| now - Duration::days(d) - Duration::hours(12)),
        );
        store
    }

    fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = app(&FakeStore::new(), &config());
        let response = app.oneshot(request("GET", "/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_token() {
        let store = seeded_store();
        let app = app(&store, &config());

        let response = app
            .clone()
            .oneshot(request("POST", "/admin/manual-cleanup", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(request("POST", "/admin/manual-cleanup", Some("unknown")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(json(response).await["error"].is_string());

        let response = app
            .oneshot(request(
                "POST",
                "/admin/manual-cleanup",
                Some("reader-secret"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Nothing ran
        assert_eq!(store.row_count("audit_logs"), 30);
    }

    #[tokio::test]
    async fn test_manual_cleanup() {
        let store = seeded_store();
        let app = app(&store, &config());

        let response = app
            .oneshot(request("POST", "/admin/manual-cleanup", Some("admin-secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["deleted"], 20);
        assert_eq!(body["archived"], 0);
        assert_eq!(body["compressed"], 0);
        assert_eq!(store.row_count("audit_logs"), 10);
    }

    #[tokio::test]
    async fn test_manual_cleanup_failure_is_generic_500() {
        let store = seeded_store();
        store.fail_table("audit_logs", "password authentication failed");
        let app = app(&store, &config());

        let response = app
            .oneshot(request("POST", "/admin/manual-cleanup", Some("admin-secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(response).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_read_endpoints() {
        let store = seeded_store();
        let app = app(&store, &config());

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/storage-metrics", Some("admin-secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body[0]["entityType"], "audit_logs");
        assert_eq!(body[0]["recordCount"], 30);

        let response = app
            .clone()
            .oneshot(request("GET", "/admin/maintenance-jobs", Some("admin-secret")))
            .await
            .unwrap();
        let body = json(response).await;
        let jobs = body.as_array().unwrap();
        assert_eq!(jobs.len(), 5);
        assert_eq!(jobs[0]["name"], "refresh-statistics");
        assert_eq!(jobs[0]["status"], "IDLE");
        assert!(jobs[0]["nextRun"].is_string());

        let response = app
            .oneshot(request(
                "GET",
                "/admin/optimization-recommendations",
                Some("admin-secret"),
            ))
            .await
            .unwrap();
        assert_eq!(json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_trigger_endpoints() {
        let store = seeded_store();
        let app = app(&store, &config());

        let response = app
            .clone()
            .oneshot(request("POST", "/admin/optimize-indexes", Some("admin-secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(json(response).await["message"].is_string());

        let response = app
            .oneshot(request("POST", "/admin/clear-cache", Some("admin-secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["cleared"], 0);
        assert!(body["message"].is_string());
    }
}
