//! Authentication failure taxonomy and its wire-visible shape.

use std::fmt;

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Authentication errors.
///
/// Every variant carries its own HTTP status; `status()` is the single place
/// where kinds are translated for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer credential on the request
    MissingToken,
    /// No subject hint on the request
    MissingSubject,
    /// Provider rejected the token, or it is already expired
    InvalidToken(String),
    /// Token subject differs from the subject the request addresses
    SubjectMismatch,
    /// Ephemeral store unreachable
    CacheUnavailable(String),
    /// Verification keys could not be obtained
    VerifierUnavailable(String),
    /// Durable store query or insert failed
    DurableStore(String),
}

impl AuthError {
    /// HTTP status for this failure kind.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::MissingSubject
            | Self::InvalidToken(_)
            | Self::SubjectMismatch => StatusCode::UNAUTHORIZED,
            Self::CacheUnavailable(_) | Self::VerifierUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::DurableStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to the caller.
    ///
    /// Backend details stay in the logs; callers only learn the failure kind.
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingToken => "Access token is required".to_string(),
            Self::MissingSubject => "Subject id is required".to_string(),
            Self::InvalidToken(msg) => format!("Invalid token: {}", msg),
            Self::SubjectMismatch => "Unauthorized".to_string(),
            Self::CacheUnavailable(_) => "Session store unavailable".to_string(),
            Self::VerifierUnavailable(_) => "Token verification unavailable".to_string(),
            Self::DurableStore(_) => "User store error".to_string(),
        }
    }

    /// Build the `{ "error": { "status", "message" } }` body.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                status: self.status().as_u16(),
                message: self.public_message(),
            },
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "Access token is required"),
            Self::MissingSubject => write!(f, "Subject id is required"),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            Self::SubjectMismatch => write!(f, "Token subject does not match requested subject"),
            Self::CacheUnavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            Self::VerifierUnavailable(msg) => write!(f, "Verifier unavailable: {}", msg),
            Self::DurableStore(msg) => write!(f, "Durable store error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

/// Error envelope written to the response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub status: u16,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}
