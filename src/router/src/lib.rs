use axum::{Router, http::StatusCode, middleware, response::IntoResponse, routing::get};
use common::auth::{AdminAuthorizer, admin_auth_middleware};
use maintenance::AdminSurface;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod endpoints;
pub mod error;

pub use error::AdminRequestError;

pub trait RouterState: Clone + Send + Sync + 'static {
    fn admin(&self) -> &AdminSurface;
    fn authorizer(&self) -> &Arc<dyn AdminAuthorizer>;
}

/// Shared state handed to every route handler
#[derive(Clone)]
pub struct AppState {
    admin: AdminSurface,
    authorizer: Arc<dyn AdminAuthorizer>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("admin", &"AdminSurface")
            .field("authorizer", &"AdminAuthorizer")
            .finish()
    }
}

impl AppState {
    pub fn new(admin: AdminSurface, authorizer: Arc<dyn AdminAuthorizer>) -> Self {
        Self { admin, authorizer }
    }
}

impl RouterState for AppState {
    fn admin(&self) -> &AdminSurface {
        &self.admin
    }

    fn authorizer(&self) -> &Arc<dyn AdminAuthorizer> {
        &self.authorizer
    }
}

/// Create the HTTP router: public health check plus the admin routes
/// behind bearer authentication.
pub fn create_router<S: RouterState>(state: S) -> Router {
    let authorizer = state.authorizer().clone();
    let auth_layer = middleware::from_fn(move |req, next| {
        admin_auth_middleware(authorizer.clone(), req, next)
    });

    Router::new()
        // Public health check endpoint (no authentication)
        .route("/health", get(health_check))
        .nest("/admin", endpoints::admin::router().layer(auth_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
