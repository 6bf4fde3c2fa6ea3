//! Error types for request signing and validation.
//!
//! Two families live here:
//!
//! - [`SignatureError`]: caller, configuration and collaborator failures. These are
//!   programmer or infrastructure mistakes and are never retried automatically.
//! - [`AuthError`]: terminal authentication failures produced by the request
//!   validator. Each carries a stable reason code for structured rejections.

use derive_more::Display;
use http::StatusCode;
use serde::Serialize;

/// Errors raised while configuring clients, building requests or talking to
/// collaborators (transport, nonce cache, credential store).
#[derive(Debug, Display)]
pub enum SignatureError {
    /// Settings are missing or malformed.
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// The caller asked for something the protocol cannot express.
    #[display("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The HTTP transport failed to deliver the request.
    #[display("Transport error: {message}")]
    Transport { message: String },

    /// The shared nonce cache could not be reached.
    #[display("Nonce cache error: {message}")]
    NonceCache { message: String },

    /// The credential store could not be queried.
    #[display("Credential store error: {message}")]
    CredentialStore { message: String },
}

impl core::error::Error for SignatureError {}

/// Reasons an inbound signed request is rejected.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthError {
    #[display("App id is missing")]
    MissingAppId,

    #[display("Invalid app id")]
    UnknownClient,

    #[display("Request timestamp is invalid")]
    InvalidTimestamp,

    #[display("Request is expired")]
    ExpiredRequest,

    #[display("Nonce is missing")]
    MissingNonce,

    #[display("Nonce has already been used")]
    ReplayedNonce,

    #[display("Invalid signature")]
    InvalidSignature,
}

impl core::error::Error for AuthError {}

impl AuthError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAppId => "missing_app_id",
            Self::UnknownClient => "unknown_client",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::ExpiredRequest => "expired_request",
            Self::MissingNonce => "missing_nonce",
            Self::ReplayedNonce => "replayed_nonce",
            Self::InvalidSignature => "invalid_signature",
        }
    }

    /// Structured rejection suitable for a response body.
    #[must_use]
    pub fn rejection(&self) -> AuthRejection {
        AuthRejection {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Reason code plus human message, as surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthRejection {
    pub code: &'static str,
    pub message: String,
}

/// Maps an error onto the HTTP response a host should emit for it.
pub trait IntoHttpResponse {
    /// HTTP status code for this error.
    fn status_code(&self) -> StatusCode;

    /// Message that is safe to show to the remote party.
    fn user_message(&self) -> String;
}

impl IntoHttpResponse for AuthError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn user_message(&self) -> String {
        self.to_string()
    }
}

impl IntoHttpResponse for SignatureError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Transport { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } | Self::NonceCache { .. } | Self::CredentialStore { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::InvalidRequest { message } => format!("Bad request: {message}"),
            Self::Transport { .. } => "Bad gateway".to_string(),
            // Never echo configuration or collaborator detail to the remote party.
            _ => "Internal server error".to_string(),
        }
    }
}
