//! HTTP authentication middleware for Axum
//!
//! Validates the bearer token of admin requests and inserts the
//! [`AdminPrincipal`] into request extensions.

use super::{AdminAuthorizer, AdminPrincipal, AuthError};
use axum::{
    Json,
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Extract the bearer token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| AuthError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AuthError::unauthorized("Invalid Authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::unauthorized("Authorization header must use Bearer scheme"))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::unauthorized("Empty bearer token"));
    }
    Ok(token.to_string())
}

fn reject(err: AuthError) -> Response {
    (
        StatusCode::from_u16(err.status_code).unwrap_or(StatusCode::UNAUTHORIZED),
        Json(serde_json::json!({ "error": err.message })),
    )
        .into_response()
}

/// Axum middleware function guarding the admin surface
///
/// Returns 401 for missing or unknown tokens and 403 for tokens without
/// the admin capability. Handlers behind it can take
/// `Extension<AdminPrincipal>`.
pub async fn admin_auth_middleware(
    authorizer: Arc<dyn AdminAuthorizer>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer_token(request.headers()) {
        Ok(token) => token,
        Err(err) => return reject(err),
    };

    let principal: AdminPrincipal = match authorizer.authorize(&token).await {
        Ok(principal) => principal,
        Err(err) => {
            log::warn!(
                "Admin request to {} rejected: {}",
                request.uri().path(),
                err.message
            );
            return reject(err);
        }
    };

    log::debug!(
        "Authorized admin request to {} as '{}'",
        request.uri().path(),
        principal.name
    );

    request.extensions_mut().insert(principal);
    next.run(request).await
}
