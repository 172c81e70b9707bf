//! Token validation for the admin surface

use super::{AdminPrincipal, AuthError};
use crate::config::AdminConfig;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Decides whether a bearer token may perform admin operations.
#[async_trait]
pub trait AdminAuthorizer: Send + Sync {
    async fn authorize(&self, token: &str) -> Result<AdminPrincipal, AuthError>;
}

/// Authorizer backed by the tokens listed in the admin configuration
pub struct StaticTokenAuthorizer {
    /// token hash -> (token name, has admin capability)
    tokens: HashMap<String, (String, bool)>,
}

impl StaticTokenAuthorizer {
    pub fn new(config: &AdminConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|t| (Self::hash_token(&t.token), (t.name.clone(), t.admin)))
            .collect();
        Self { tokens }
    }

    fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl AdminAuthorizer for StaticTokenAuthorizer {
    async fn authorize(&self, token: &str) -> Result<AdminPrincipal, AuthError> {
        match self.tokens.get(&Self::hash_token(token)) {
            Some((name, true)) => Ok(AdminPrincipal::new(name.clone())),
            Some((name, false)) => {
                log::warn!("Token '{name}' lacks the admin capability");
                Err(AuthError::forbidden("Admin capability required"))
            }
            None => Err(AuthError::unauthorized("Invalid admin token")),
        }
    }
}
