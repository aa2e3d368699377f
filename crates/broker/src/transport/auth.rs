// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::BrokerError;
use crate::state::BrokerState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), BrokerError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header =
        headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(BrokerError::AuthError)?;
    let token = header.strip_prefix("Bearer ").ok_or(BrokerError::AuthError)?;

    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(BrokerError::AuthError)
    }
}

/// Validate a token passed as a WS upgrade query parameter.
pub fn validate_ws_token(token: Option<&str>, expected: Option<&str>) -> Result<(), BrokerError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };
    match token {
        Some(t) if constant_time_eq(t, expected) => Ok(()),
        _ => Err(BrokerError::AuthError),
    }
}

/// Axum middleware enforcing Bearer auth on every route except health and
/// WebSocket upgrades, which authenticate via their own query parameters.
pub async fn auth_layer(
    state: State<Arc<BrokerState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/api/v1/health" || path.starts_with("/ws/") {
        return next.run(req).await;
    }

    if let Err(code) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        let (status, body) = code.to_http_response("unauthorized");
        return (status, body).into_response();
    }

    next.run(req).await
}

pub fn unauthorized_response(reason: &str) -> Response {
    let (status, body) = BrokerError::AuthError.to_http_response(reason);
    (status, body).into_response()
}
