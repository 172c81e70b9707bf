//! Authentication for the admin surface
//!
//! Every admin operation requires a bearer token that carries the admin
//! capability. Tokens are configured statically and compared by hash.

mod authenticator;
pub mod middleware;

pub use authenticator::{AdminAuthorizer, StaticTokenAuthorizer};
pub use middleware::admin_auth_middleware;

/// Caller identity attached to an authorized admin request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPrincipal {
    /// Configured name of the token used
    pub name: String,
}

impl AdminPrincipal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Authentication error with HTTP status code
#[derive(Debug, Clone)]
pub struct AuthError {
    /// HTTP status code (401, 403)
    pub status_code: u16,
    /// Error message for client
    pub message: String,
}

impl AuthError {
    /// Create a 401 Unauthorized error (missing/invalid token)
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status_code: 401,
            message: message.into(),
        }
    }

    /// Create a 403 Forbidden error (valid token without admin capability)
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status_code: 403,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status_code, self.message)
    }
}

impl std::error::Error for AuthError {}
