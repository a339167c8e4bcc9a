//! Requester identity and role gates.
//!
//! Token issuing and verification (LDAP, JWT) live outside this service.
//! Here a bearer token is only mapped to a [`Requester`] whose roles are
//! checked as boolean gates.

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::models::ApiTokenConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Support,
    Api,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Support => "support",
            Role::Api => "api",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub username: String,
    pub roles: Vec<Role>,
}

impl Requester {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

pub trait Authenticator: Send + Sync {
    /// Resolve a token to its requester, `None` if the token is unknown.
    fn authenticate(&self, token: &str) -> Option<Requester>;
}

/// Authenticates against the static token table from the server config.
pub struct TokenAuthenticator {
    tokens: HashMap<String, Requester>,
}

impl TokenAuthenticator {
    pub fn new(tokens: &HashMap<String, ApiTokenConfig>) -> Self {
        let tokens = tokens
            .iter()
            .map(|(token, cfg)| {
                (
                    token.clone(),
                    Requester {
                        username: cfg.username.clone(),
                        roles: cfg.roles.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<Requester> {
        self.tokens.get(token).cloned()
    }
}

/// Token from `Authorization: Bearer <token>` or `X-Auth-Token: <token>`.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token);
            }
        }
    }

    headers
        .get("x-auth-token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn authenticator() -> TokenAuthenticator {
        let mut tokens = HashMap::new();
        tokens.insert(
            "secret".to_string(),
            ApiTokenConfig {
                username: "slurm-adapter".to_string(),
                roles: vec![Role::Api],
            },
        );
        TokenAuthenticator::new(&tokens)
    }

    #[test]
    fn test_known_token_resolves_requester() {
        let requester = authenticator().authenticate("secret").expect("known token");
        assert_eq!(requester.username, "slurm-adapter");
        assert!(requester.has_role(Role::Api));
        assert!(!requester.has_role(Role::Admin));
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        assert!(authenticator().authenticate("nope").is_none());
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(extract_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_extract_x_auth_token() {
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-token", HeaderValue::from_static("abc123"));
        assert_eq!(extract_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_extract_ignores_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(extract_token(&headers), None);
    }
}
