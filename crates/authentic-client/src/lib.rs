//! Client for JWT-authenticated HTTP requests.
//!
//! This crate talks to an authentic auth server and to the resource services
//! that trust the tokens it issues:
//!
//! - Public key fetching and caching, with at most one fetch in flight
//! - RS256 token verification with typed failure reasons
//! - Session state (identity, token, stored password) with change observers
//! - Authenticated GET/POST/PUT/DELETE that attach, refresh, or omit the
//!   bearer token as the session allows
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Caller         │────▶│ AuthenticClient  │──── Session (observers)
//! │   get/post/...   │     │ (orchestrator)   │
//! └──────────────────┘     └───┬──────────┬───┘
//!                              │          │ re-login
//!                     ┌────────▼───────┐ ┌▼─────────────┐
//!                     │ TokenVerifier  │ │   AuthApi    │
//!                     └────────┬───────┘ └──────┬───────┘
//!                     ┌────────▼───────┐        │
//!                     │   KeyCache     │        │
//!                     └────────┬───────┘        │
//!                              │  Transport     │
//!                     ┌────────▼────────────────▼───────┐
//!                     │ auth server / resource services │
//!                     └─────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use authentic_client::{AuthenticClient, ClientConfig, RequestOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ClientConfig::new("https://auth.example.com");
//! config.email = Some("chet@scalehaus.io".to_string());
//! config.password = Some("notswordfish".to_string());
//!
//! let client = AuthenticClient::new(config)?;
//!
//! // Logs in on first use, then attaches `Authorization: Bearer <token>`.
//! let response = client
//!     .get("https://api.example.com/profile", RequestOptions::default())
//!     .await?;
//! println!("{}", response.body);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::time::Duration;

use serde::Deserialize;
use url::Url;

pub mod api;
pub mod client;
pub mod error;
pub mod jwt;
pub mod keys;
pub mod session;
pub mod transport;

pub use api::{
    AuthApi, AuthResponse, ChangePassword, ChangePasswordRequest, ConfirmRequest, LoginRequest,
    SignupRequest,
};
pub use client::{AuthenticClient, ClientBuilder};
pub use error::{ClientError, HttpError, KeyError, Result, TokenError, TransportError};
pub use jwt::{Claims, RsaTokenVerifier, TokenVerifier};
pub use keys::{KeyCache, PublicKey};
pub use session::{EventKind, Session, SessionEvent, Subscription};
pub use transport::{
    AbsoluteUrls, OriginResolver, RequestEnvelope, RequestOptions, ReqwestTransport, Response,
    Transport, UrlResolver,
};

/// What to do with a token that fails verification when no password is
/// stored to log in again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleTokenPolicy {
    /// Send the request without an `Authorization` header.
    #[default]
    Anonymous,
    /// Send the request with the stale token anyway.
    AttachStale,
}

/// Configuration for an [`AuthenticClient`].
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Base URL of the auth server (e.g., `https://auth.example.com`).
    #[serde(default)]
    pub server: String,

    /// Path prefix of the auth endpoints.
    #[serde(default = "ClientConfig::default_prefix")]
    pub prefix: String,

    /// Identity to log in as.
    #[serde(default)]
    pub email: Option<String>,

    /// Password used to log in again when no valid token is stored.
    #[serde(default)]
    pub password: Option<String>,

    /// Token from a previous session.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Override for the public key URL.
    #[serde(default)]
    pub pub_key_url: Option<String>,

    /// How long a fetched public key stays valid, in milliseconds.
    #[serde(default = "ClientConfig::default_cache_duration", alias = "cacheDuration")]
    pub cache_duration_ms: u64,

    /// Fallback for invalid tokens when no password is stored.
    #[serde(default)]
    pub stale_token_policy: StaleTokenPolicy,
}

impl ClientConfig {
    fn default_prefix() -> String {
        "/auth".to_string()
    }

    const fn default_cache_duration() -> u64 {
        60 * 60 * 1000 // 1 hour
    }

    /// Configuration for `server` with every other field at its default.
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    /// Parse and check the server URL.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the server is missing or not a URL.
    pub fn server_url(&self) -> Result<Url> {
        if self.server.trim().is_empty() {
            return Err(ClientError::Config("server is required".to_string()));
        }
        let url = Url::parse(&self.server)
            .map_err(|e| ClientError::Config(format!("server must be a url: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ClientError::Config(format!(
                "server must be a url: {}",
                self.server
            )));
        }
        Ok(url)
    }

    /// `<server><prefix>`, the root of the auth endpoints.
    #[must_use]
    pub fn auth_base(&self) -> String {
        format!("{}{}", self.server.trim_end_matches('/'), self.prefix)
    }

    /// URL string of a named auth endpoint.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.auth_base().trim_end_matches('/'))
    }

    /// URL the public key is fetched from.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the URL does not parse.
    pub fn public_key_url(&self) -> Result<Url> {
        let raw = self
            .pub_key_url
            .clone()
            .unwrap_or_else(|| self.endpoint(api::endpoints::PUBLIC_KEY));
        Url::parse(&raw).map_err(|e| ClientError::Config(format!("invalid public key url: {e}")))
    }

    /// The key cache time-to-live as a `Duration`.
    #[must_use]
    pub const fn cache_duration(&self) -> Duration {
        Duration::from_millis(self.cache_duration_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            prefix: Self::default_prefix(),
            email: None,
            password: None,
            auth_token: None,
            pub_key_url: None,
            cache_duration_ms: Self::default_cache_duration(),
            stale_token_policy: StaleTokenPolicy::default(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server", &self.server)
            .field("prefix", &self.prefix)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("pub_key_url", &self.pub_key_url)
            .field("cache_duration_ms", &self.cache_duration_ms)
            .field("stale_token_policy", &self.stale_token_policy)
            .finish()
    }
}
