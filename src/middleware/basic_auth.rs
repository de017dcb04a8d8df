use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;

/// Username/password pair guarding the dev endpoints
#[derive(Clone)]
pub struct DevCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DevCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl DevCredentials {
    fn matches(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };

        match decoded.split_once(':') {
            Some((user, pass)) => user == self.username && pass == self.password,
            None => false,
        }
    }
}

/// Reject requests without valid HTTP basic credentials
pub async fn require_basic_auth(
    State(credentials): State<Arc<DevCredentials>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| credentials.matches(value))
        .unwrap_or(false);

    if !authorized {
        warn!(path = %req.uri().path(), "Rejected dev endpoint request with bad credentials");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(req).await)
}
