// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbolic error codes for the waiting-room API (closed set, spec §6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitError {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    PositionExpired,
    SessionExpired,
    RateLimited,
    QueueFull,
    Maintenance,
    /// Fingerprint presented does not match the credential's bound fingerprint.
    BoundMismatch,
    /// Admission bucket has no tokens available right now.
    NoCapacity,
    /// Queue descriptor status is not `active`.
    QueueUnavailable,
    InternalError,
}

impl WaitError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Unauthorized | Self::BoundMismatch => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::PositionExpired | Self::SessionExpired => 410,
            Self::RateLimited | Self::NoCapacity => 429,
            Self::QueueFull | Self::Maintenance | Self::QueueUnavailable => 503,
            Self::InternalError => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid-request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not-found",
            Self::PositionExpired => "position-expired",
            Self::SessionExpired => "session-expired",
            Self::RateLimited => "rate-limited",
            Self::QueueFull => "queue-full",
            Self::Maintenance => "maintenance",
            Self::BoundMismatch => "bound-mismatch",
            Self::NoCapacity => "no-capacity",
            Self::QueueUnavailable => "queue-unavailable",
            Self::InternalError => "internal-error",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>, request_id: String) -> ErrorResponse {
        ErrorResponse {
            error: ErrorBody {
                code: self.as_str().to_owned(),
                message: message.into(),
                details: None,
            },
            request_id,
        }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
        request_id: String,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_error_body(message, request_id)))
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for WaitError {}

/// Top-level error response envelope (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
