//! Handshake authentication
//!
//! The registry trusts whatever principal the resolver returns at connect
//! time. Credentials arrive as `Authorization: Bearer <token>` or, for
//! browser clients that cannot set headers on a WebSocket, as `?token=`.

use async_trait::async_trait;
use axum::http::HeaderMap;
use staffpulse_core::PrincipalId;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::TokenGrant;

/// Authentication errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credential supplied")]
    MissingCredential,

    #[error("credential was not accepted")]
    InvalidCredential,
}

/// Maps a bearer credential to the principal it authenticates
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<PrincipalId, AuthError>;
}

/// Resolver backed by a fixed list of token grants
pub struct StaticTokenResolver {
    grants: Vec<TokenGrant>,
}

impl StaticTokenResolver {
    pub fn new(grants: Vec<TokenGrant>) -> Self {
        Self { grants }
    }
}

#[async_trait]
impl PrincipalResolver for StaticTokenResolver {
    async fn resolve(&self, credential: &str) -> Result<PrincipalId, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        // Scan every grant so timing does not depend on the match position
        let mut matched: Option<&TokenGrant> = None;
        for grant in &self.grants {
            if bool::from(grant.token.as_bytes().ct_eq(credential.as_bytes())) {
                matched = Some(grant);
            }
        }

        matched
            .map(|grant| PrincipalId::new(grant.principal.clone()))
            .ok_or(AuthError::InvalidCredential)
    }
}

/// Pull the handshake credential from the request
pub fn extract_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(auth) = headers.get("authorization") {
        if let Ok(value) = auth.to_str() {
            if let Some(token) = extract_bearer_token(value) {
                return Some(token.to_string());
            }
        }
    }

    query_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Extract the token from a `Bearer <token>` header value
fn extract_bearer_token(auth: &str) -> Option<&str> {
    let (scheme, token) = auth.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Constant-time comparison of the internal service token
pub fn verify_internal_token(expected: &str, provided: Option<&str>) -> bool {
    match provided {
        Some(provided) if !expected.is_empty() => {
            bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
        }
        _ => false,
    }
}
