//! Client error types.
//!
//! Errors are split by concern: [`KeyError`] for public key retrieval,
//! [`TokenError`] for token verification, [`TransportError`] for the HTTP
//! layer, and [`ClientError`] which is what every public client operation
//! returns.

use serde_json::Value;
use thiserror::Error;

/// A result type using `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Failure to obtain the token verification key.
///
/// Cloneable so a single failed fetch can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The key endpoint could not be reached.
    #[error("public key request failed: {0}")]
    Request(String),

    /// The key endpoint answered with a non-success status.
    #[error("public key request returned status {0}")]
    Status(u16),

    /// The response did not carry a usable key.
    #[error("could not retrieve public key")]
    Missing,

    /// The key was present but is not a valid RSA public key.
    #[error("invalid public key: {0}")]
    InvalidKey(String),
}

/// Reasons a token failed verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// No token is stored.
    #[error("jwt must be provided")]
    MissingToken,

    /// The token is not a three-segment JWT with a JSON header and payload.
    #[error("jwt malformed")]
    Malformed(String),

    /// The token was signed with an algorithm other than RS256.
    #[error("invalid algorithm: {0}")]
    AlgorithmMismatch(String),

    /// The signature does not match the server's public key.
    #[error("invalid signature")]
    InvalidSignature,

    /// The `exp` claim is in the past.
    #[error("jwt expired")]
    Expired,

    /// The verification key could not be obtained.
    #[error("key unavailable: {0}")]
    KeyUnavailable(#[from] KeyError),
}

impl TokenError {
    /// Returns `true` if a fresh login could fix this failure.
    ///
    /// A missing key is not something a new token helps with.
    #[must_use]
    pub const fn is_token_invalid(&self) -> bool {
        !matches!(self, Self::KeyUnavailable(_))
    }
}

/// Errors raised by the HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A success response carried a body that is not JSON.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

/// An HTTP-level rejection: message, status code and the parsed body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    /// Human-readable description.
    pub message: String,
    /// HTTP status code, when one was received.
    pub status_code: Option<u16>,
    /// Parsed response body, `Value::Null` when empty.
    pub body: Value,
}

impl HttpError {
    /// Build the error for a response with a failing status code.
    #[must_use]
    pub fn from_status(status: u16, body: Value) -> Self {
        Self {
            message: format!("Received statusCode {status}"),
            status_code: Some(status),
            body,
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors returned by [`AuthenticClient`](crate::AuthenticClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// A request URL could not be resolved.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The request body could not be serialized.
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    /// The network request failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The auth server rejected the call.
    #[error("auth server error: {0}")]
    AuthServer(HttpError),

    /// A resource service rejected the call.
    #[error("{0}")]
    ResourceServer(HttpError),

    /// The stored token could not be verified.
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl ClientError {
    /// Returns the HTTP status code attached to the error, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::AuthServer(err) | Self::ResourceServer(err) => err.status_code,
            _ => None,
        }
    }

    /// Returns the parsed response body attached to the error, if any.
    #[must_use]
    pub const fn body(&self) -> Option<&Value> {
        match self {
            Self::AuthServer(err) | Self::ResourceServer(err) => Some(&err.body),
            _ => None,
        }
    }

    /// Returns `true` if this error came from token verification.
    #[must_use]
    pub const fn is_token_invalid(&self) -> bool {
        matches!(self, Self::Token(err) if err.is_token_invalid())
    }
}
