//! Authenticated request orchestration.
//!
//! [`AuthenticClient`] decides, per outbound call, which token (if any) goes
//! on the request:
//!
//! - no token, identity and password stored: log in, then send with the new token
//! - no token, no password: send anonymously, exactly as a plain request would
//! - token stored and valid: send with it
//! - token invalid, password stored: log in once, verify the new token, send
//! - token invalid, no password: apply the [`StaleTokenPolicy`]
//!
//! Failing responses from resource services become
//! [`ClientError::ResourceServer`] carrying status and body.

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::api::{
    AuthApi, AuthResponse, ChangePassword, ChangePasswordRequest, ConfirmRequest, LoginRequest,
    SignupRequest,
};
use crate::error::{ClientError, HttpError, Result, TokenError};
use crate::jwt::{Claims, RsaTokenVerifier, TokenVerifier};
use crate::keys::KeyCache;
use crate::session::{EventKind, Session, SessionEvent, Subscription};
use crate::transport::{
    AbsoluteUrls, RequestEnvelope, RequestOptions, ReqwestTransport, Response, Transport,
    UrlResolver,
};
use crate::{ClientConfig, StaleTokenPolicy};

/// Client for an auth server and the resource services that trust it.
///
/// Cheap to clone; clones share the session, key cache and transport.
#[derive(Clone)]
pub struct AuthenticClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn UrlResolver>,
    verifier: Arc<dyn TokenVerifier>,
    keys: Arc<KeyCache>,
    api: AuthApi,
    session: Arc<Session>,
}

/// Builder for [`AuthenticClient`] with injectable collaborators.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn UrlResolver>>,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl ClientBuilder {
    /// Use a custom transport for every request, including key fetches.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom resolver for caller-supplied URLs.
    #[must_use]
    pub fn url_resolver(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use a custom token verifier instead of RS256 against the server key.
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the server or public key URL is
    /// invalid. No network call is made.
    pub fn build(self) -> Result<AuthenticClient> {
        let config = self.config;
        config.server_url()?;
        let key_url = config.public_key_url()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(None)?),
        };
        let keys = Arc::new(KeyCache::new(
            key_url,
            config.cache_duration(),
            Arc::clone(&transport),
        ));
        let verifier: Arc<dyn TokenVerifier> = match self.verifier {
            Some(verifier) => verifier,
            None => Arc::new(RsaTokenVerifier::new(Arc::clone(&keys))),
        };
        let resolver: Arc<dyn UrlResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(AbsoluteUrls),
        };
        let api = AuthApi::new(config.auth_base(), Arc::clone(&transport));
        let session = Arc::new(Session::new(
            config.email.clone(),
            config.password.clone(),
            config.auth_token.clone(),
        ));

        tracing::debug!(server = %config.server, keys = %keys.url(), "Created authentic client");

        Ok(AuthenticClient {
            config: Arc::new(config),
            transport,
            resolver,
            verifier,
            keys,
            api,
            session,
        })
    }
}

impl AuthenticClient {
    /// Create a client with the default transport and URL resolver.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a client with custom collaborators.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            resolver: None,
            verifier: None,
        }
    }

    /// The configuration this client was built from.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The shared session state.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The public key cache.
    #[must_use]
    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    /// The current identity.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        self.session.email()
    }

    /// The current token.
    #[must_use]
    pub fn auth_token(&self) -> Option<String> {
        self.session.auth_token()
    }

    /// Replace the stored token.
    pub fn set_auth_token(&self, token: Option<String>) {
        self.session.set_auth_token(token);
    }

    /// Replace the stored identity.
    pub fn set_email(&self, email: Option<String>) {
        self.session.set_email(email);
    }

    /// Observe session changes. See [`Session::subscribe`].
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.session.subscribe(kind, handler)
    }

    /// Verify the stored token.
    ///
    /// # Errors
    ///
    /// Returns the reason the token is not usable.
    pub async fn verify_token(&self) -> std::result::Result<Claims, TokenError> {
        self.verifier
            .verify(self.session.auth_token().as_deref())
            .await
    }

    // =========================================================================
    // Resource Requests
    // =========================================================================

    /// Send an authenticated GET.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication, the network, or the service fails.
    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.execute(Method::GET, url, None, options).await
    }

    /// Send an authenticated POST with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication, the network, or the service fails.
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        data: &T,
        options: RequestOptions,
    ) -> Result<Response> {
        let body = serde_json::to_value(data)?;
        self.execute(Method::POST, url, Some(body), options).await
    }

    /// Send an authenticated PUT with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication, the network, or the service fails.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        url: &str,
        data: &T,
        options: RequestOptions,
    ) -> Result<Response> {
        let body = serde_json::to_value(data)?;
        self.execute(Method::PUT, url, Some(body), options).await
    }

    /// Send an authenticated DELETE.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication, the network, or the service fails.
    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.execute(Method::DELETE, url, None, options).await
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Response> {
        let url = self.resolver.resolve(url)?;
        let token = self.authorize().await?;

        let mut envelope = RequestEnvelope::new(method, url)
            .with_body(body)
            .with_options(options);
        if let Some(token) = &token {
            envelope = envelope.with_bearer(token)?;
        }

        let response = self.transport.send(envelope).await?;
        if !response.is_success() {
            tracing::debug!(status = response.status, "Resource server rejected request");
            return Err(ClientError::ResourceServer(HttpError::from_status(
                response.status,
                response.body,
            )));
        }
        Ok(response)
    }

    /// Pick the token for one outbound call. `None` means send anonymously.
    async fn authorize(&self) -> Result<Option<String>> {
        let Some(token) = self.session.auth_token() else {
            return match self.session.credentials() {
                Some((email, password)) => {
                    tracing::debug!(email = %email, "No token stored, logging in");
                    self.relogin(email, password).await.map(Some)
                }
                None => Ok(None),
            };
        };

        let err = match self.verifier.verify(Some(&token)).await {
            Ok(_) => return Ok(Some(token)),
            Err(err) if !err.is_token_invalid() => return Err(err.into()),
            Err(err) => err,
        };

        if let Some((email, password)) = self.session.credentials() {
            tracing::debug!(error = %err, "Stored token rejected, logging in again");
            let fresh = self.relogin(email, password).await?;
            // One attempt only; a second failure goes to the caller.
            self.verifier.verify(Some(&fresh)).await?;
            return Ok(Some(fresh));
        }

        match self.config.stale_token_policy {
            StaleTokenPolicy::Anonymous => {
                tracing::warn!(error = %err, "Stored token rejected, sending anonymously");
                Ok(None)
            }
            StaleTokenPolicy::AttachStale => {
                tracing::warn!(error = %err, "Stored token rejected, sending it anyway");
                Ok(Some(token))
            }
        }
    }

    async fn relogin(&self, email: String, password: String) -> Result<String> {
        let response = self.login(&LoginRequest { email, password }).await?;
        response
            .auth_token()
            .map(str::to_string)
            .ok_or_else(|| missing_token(&response))
    }

    // =========================================================================
    // Auth Server Operations
    // =========================================================================

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn signup(&self, req: &SignupRequest) -> Result<AuthResponse> {
        self.api.signup(req).await
    }

    /// Confirm an account and store the resulting session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server rejects it, or the
    /// response carries no token.
    pub async fn confirm(&self, req: &ConfirmRequest) -> Result<AuthResponse> {
        let response = self.api.confirm(req).await?;
        self.store_login(&req.email, &response)?;
        Ok(response)
    }

    /// Log in and store the resulting session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the credentials are rejected,
    /// or the response carries no token.
    pub async fn login(&self, req: &LoginRequest) -> Result<AuthResponse> {
        let response = self.api.login(req).await?;
        self.store_login(&req.email, &response)?;
        Ok(response)
    }

    /// Ask the server to email a password change link.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn change_password_request(
        &self,
        req: &ChangePasswordRequest,
    ) -> Result<AuthResponse> {
        self.api.change_password_request(req).await
    }

    /// Complete a password change and store the resulting session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server rejects it, or the
    /// response carries no token.
    pub async fn change_password(&self, req: &ChangePassword) -> Result<AuthResponse> {
        let response = self.api.change_password(req).await?;
        self.store_login(&req.email, &response)?;
        Ok(response)
    }

    /// Forget the identity and token. No network call is made.
    pub fn logout(&self) {
        self.session.logout();
    }

    fn store_login(&self, email: &str, response: &AuthResponse) -> Result<()> {
        let token = response
            .auth_token()
            .ok_or_else(|| missing_token(response))?;
        self.session.set_login(email.to_string(), token.to_string());
        Ok(())
    }
}

fn missing_token(response: &AuthResponse) -> ClientError {
    ClientError::AuthServer(HttpError {
        message: "missing authToken in response".to_string(),
        status_code: None,
        body: serde_json::to_value(response).unwrap_or(Value::Null),
    })
}

impl std::fmt::Debug for AuthenticClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticClient")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use parking_lot::Mutex;

    /// Records envelopes and answers every request with the same response.
    struct RecordingTransport {
        sent: Mutex<Vec<RequestEnvelope>>,
        status: u16,
        body: Value,
    }

    impl RecordingTransport {
        fn new(status: u16, body: Value) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                status,
                body,
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            request: RequestEnvelope,
        ) -> std::result::Result<Response, TransportError> {
            self.sent.lock().push(request);
            Ok(Response {
                status: self.status,
                headers: reqwest::header::HeaderMap::new(),
                body: self.body.clone(),
            })
        }
    }

    fn client_with(transport: Arc<RecordingTransport>) -> AuthenticClient {
        AuthenticClient::builder(ClientConfig::new("http://localhost:3000"))
            .transport(transport)
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_missing_server() {
        let result = AuthenticClient::new(ClientConfig::default());
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn rejects_invalid_server_without_network() {
        let transport = RecordingTransport::new(200, Value::Null);
        let result = AuthenticClient::builder(ClientConfig::new("not a url"))
            .transport(transport.clone())
            .build();

        assert!(matches!(result, Err(ClientError::Config(_))));
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn rejects_invalid_key_url() {
        let mut config = ClientConfig::new("http://localhost:3000");
        config.pub_key_url = Some("::".to_string());
        assert!(matches!(
            AuthenticClient::new(config),
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn anonymous_request_is_untouched() {
        let transport = RecordingTransport::new(200, serde_json::json!({ "ok": true }));
        let client = client_with(transport.clone());

        let response = client
            .post(
                "http://localhost:4000/items",
                &serde_json::json!({ "a": 1 }),
                RequestOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.body, serde_json::json!({ "ok": true }));
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::POST);
        assert_eq!(sent[0].url.as_str(), "http://localhost:4000/items");
        assert!(sent[0].headers.get(reqwest::header::AUTHORIZATION).is_none());
        assert_eq!(sent[0].body, Some(serde_json::json!({ "a": 1 })));
    }

    #[tokio::test]
    async fn failing_status_becomes_resource_error() {
        let transport = RecordingTransport::new(403, serde_json::json!({ "error": "forbidden" }));
        let client = client_with(transport);

        let err = client
            .get("http://localhost:4000/", RequestOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::ResourceServer(_)));
        assert_eq!(err.status_code(), Some(403));
        assert_eq!(err.body(), Some(&serde_json::json!({ "error": "forbidden" })));
        assert_eq!(err.to_string(), "Received statusCode 403");
    }

    #[tokio::test]
    async fn success_status_with_error_field_is_returned() {
        let transport = RecordingTransport::new(200, serde_json::json!({ "error": "partial" }));
        let client = client_with(transport);

        let response = client
            .get("http://localhost:4000/", RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, serde_json::json!({ "error": "partial" }));
    }

    #[tokio::test]
    async fn relative_url_needs_resolver() {
        let transport = RecordingTransport::new(200, Value::Null);
        let client = client_with(transport.clone());

        let err = client
            .get("/public", RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let transport = RecordingTransport::new(200, Value::Null);
        let mut config = ClientConfig::new("http://localhost:3000");
        config.email = Some("a@b.com".to_string());
        config.auth_token = Some("tok".to_string());
        let client = AuthenticClient::builder(config)
            .transport(transport.clone())
            .build()
            .unwrap();

        client.logout();

        assert!(client.email().is_none());
        assert!(client.auth_token().is_none());
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn verify_without_token_needs_no_network() {
        let transport = RecordingTransport::new(200, Value::Null);
        let client = client_with(transport.clone());

        assert_eq!(client.verify_token().await, Err(TokenError::MissingToken));

        client.set_auth_token(Some("1234".to_string()));
        assert!(matches!(
            client.verify_token().await,
            Err(TokenError::Malformed(_))
        ));
        assert!(transport.sent.lock().is_empty());
    }
}
