// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Wire-facing error kinds for the broker's HTTP and protocol-error surfaces.
///
/// Session-internal failures never escape the session actor as this type directly;
/// they are converted into status messages on the relevant socket. This enum exists
/// for the places an error genuinely crosses a wire boundary: an HTTP response, or a
/// `protocol_error` frame sent back to a misbehaving client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerError {
    ProtocolError,
    AuthError,
    NotFound,
    Busy,
    ResourceExhausted,
    Timeout,
    Transient,
    Fatal,
}

impl BrokerError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ProtocolError => 400,
            Self::AuthError => 401,
            Self::NotFound => 404,
            Self::Busy => 409,
            Self::ResourceExhausted => 429,
            Self::Timeout => 504,
            Self::Transient => 502,
            Self::Fatal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Busy => "BUSY",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Timeout => "TIMEOUT",
            Self::Transient => "TRANSIENT",
            Self::Fatal => "FATAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
