//! Public key fetching and caching.
//!
//! The auth server publishes the RSA public key it signs tokens with at
//! `<server><prefix>/public-key`. [`KeyCache`] fetches it lazily, keeps it
//! for a configurable time-to-live, and makes sure that at most one fetch is
//! outstanding at any time: callers arriving while a fetch is in flight
//! await that same fetch.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::DecodingKey;
use parking_lot::Mutex;
use reqwest::Method;
use serde::Deserialize;
use url::Url;

use crate::error::KeyError;
use crate::transport::{RequestEnvelope, Transport};

/// Body returned by the public key endpoint.
#[derive(Debug, Deserialize)]
struct PublicKeyResponse {
    #[serde(default)]
    data: Option<PublicKeyData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyData {
    public_key: Option<String>,
}

/// The RSA public key used to verify tokens.
#[derive(Clone)]
pub struct PublicKey(Arc<DecodingKey>);

impl PublicKey {
    /// Parse a PEM-encoded RSA public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM is not an RSA public key.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map(|key| Self(Arc::new(key)))
            .map_err(|e| KeyError::InvalidKey(e.to_string()))
    }

    /// The key in the form `jsonwebtoken` verifies with.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.0
    }

    /// Returns `true` if both handles point at the same fetched key.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PublicKey(..)")
    }
}

type KeyFetch = Shared<BoxFuture<'static, Result<PublicKey, KeyError>>>;

struct CachedKey {
    key: PublicKey,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entry: Option<CachedKey>,
    /// The outstanding fetch and its sequence number.
    in_flight: Option<(u64, KeyFetch)>,
    next_fetch: u64,
}

/// Time-bounded cache for the server's public key.
///
/// Scoped to one client; two clients never share a cache.
pub struct KeyCache {
    url: Url,
    ttl: Duration,
    transport: Arc<dyn Transport>,
    state: Mutex<CacheState>,
}

impl KeyCache {
    /// Create an empty cache for the key published at `url`.
    #[must_use]
    pub fn new(url: Url, ttl: Duration, transport: Arc<dyn Transport>) -> Self {
        Self {
            url,
            ttl,
            transport,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// The URL the key is fetched from.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Returns `true` if a key is cached and has not yet expired.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.state
            .lock()
            .entry
            .as_ref()
            .is_some_and(|entry| entry.fetched_at.elapsed() < self.ttl)
    }

    /// Drop the cached key so the next `get` fetches again.
    pub fn invalidate(&self) {
        self.state.lock().entry = None;
    }

    /// Get the public key, fetching it if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails. Failures are not cached.
    pub async fn get(&self) -> Result<PublicKey, KeyError> {
        let (id, fetch) = {
            let mut state = self.state.lock();
            if let Some(entry) = &state.entry {
                if entry.fetched_at.elapsed() < self.ttl {
                    tracing::trace!("Public key cache hit");
                    return Ok(entry.key.clone());
                }
            }

            if let Some((id, fetch)) = &state.in_flight {
                tracing::debug!("Joining in-flight public key fetch");
                (*id, fetch.clone())
            } else {
                let id = state.next_fetch;
                state.next_fetch += 1;
                let fetch = fetch_key(Arc::clone(&self.transport), self.url.clone())
                    .boxed()
                    .shared();
                state.in_flight = Some((id, fetch.clone()));
                (id, fetch)
            }
        };

        let result = fetch.await;

        // The first waiter to finish settles the fetch; the rest find it gone.
        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|(current, _)| *current == id) {
            state.in_flight = None;
            if let Ok(key) = &result {
                state.entry = Some(CachedKey {
                    key: key.clone(),
                    fetched_at: Instant::now(),
                });
            }
        }

        result
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("url", &self.url.as_str())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

async fn fetch_key(transport: Arc<dyn Transport>, url: Url) -> Result<PublicKey, KeyError> {
    tracing::debug!(url = %url, "Fetching public key");

    let response = transport
        .send(RequestEnvelope::new(Method::GET, url))
        .await
        .map_err(|e| KeyError::Request(e.to_string()))?;

    if !response.is_success() {
        tracing::warn!(status = response.status, "Public key endpoint rejected request");
        return Err(KeyError::Status(response.status));
    }

    let pem = parse_public_key(response.body)?;
    let key = PublicKey::from_pem(&pem)?;
    tracing::debug!("Cached public key");
    Ok(key)
}

/// Pull `data.publicKey` out of the endpoint's JSON body.
fn parse_public_key(body: serde_json::Value) -> Result<String, KeyError> {
    serde_json::from_value::<PublicKeyResponse>(body)
        .ok()
        .and_then(|response| response.data)
        .and_then(|data| data.public_key)
        .filter(|pem| !pem.is_empty())
        .ok_or(KeyError::Missing)
}
