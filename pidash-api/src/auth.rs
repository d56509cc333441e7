//! HTTP Basic authentication for `/api/*`.
//!
//! The configured secret is the hex SHA-256 of the password; the password
//! itself is never stored.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pidash_service::config::ServerConfig;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct AuthState {
    enabled: bool,
    username: String,
    password_hash: String,
}

impl AuthState {
    pub fn new(enabled: bool, username: impl Into<String>, password_hash: &str) -> Self {
        Self {
            enabled,
            username: username.into(),
            password_hash: password_hash.trim().to_ascii_lowercase(),
        }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        Self::new(server.auth_enabled, server.username.clone(), &server.password_hash)
    }

    /// An empty configured hash matches nothing.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        !self.password_hash.is_empty()
            && username == self.username
            && constant_time_eq(hash_password(password).as_bytes(), self.password_hash.as_bytes())
    }
}

/// Hex SHA-256 of `password`, the form stored in configuration.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Decode `Basic <base64(user:pass)>`.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

pub async fn basic_auth(
    State(auth): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(request).await;
    }

    let credentials = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic);

    match credentials {
        Some((user, pass)) if auth.verify(&user, &pass) => next.run(request).await,
        Some((user, _)) => {
            warn!(user = %user, path = %request.uri().path(), "rejected dashboard credentials");
            ApiError::Unauthorized.into_response()
        }
        None => ApiError::Unauthorized.into_response(),
    }
}
