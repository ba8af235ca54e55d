//! Auth server API calls.
//!
//! Thin wrappers over the auth server's endpoints. Each call posts a JSON
//! body to `<server><prefix>/<endpoint>` and normalizes failures (bad
//! status, or an `error` field in the body) into
//! [`ClientError::AuthServer`]. Session updates happen in the client, not
//! here.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{ClientError, HttpError, Result};
use crate::transport::{RequestEnvelope, Transport};

/// Request payload for creating an account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    /// Account email address.
    pub email: String,
    /// Account password.
    pub password: String,
    /// Link the confirmation email should point at.
    pub confirm_url: String,
    /// Extra fields forwarded to the server (e.g. `from`, `subject`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request payload for confirming an account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    /// Account email address.
    pub email: String,
    /// Token delivered by the confirmation email.
    pub confirm_token: String,
}

/// Request payload for email/password login.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    /// Account email address.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Request payload for starting a password change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    /// Account email address.
    pub email: String,
    /// Link the password change email should point at.
    pub change_url: String,
    /// Extra fields forwarded to the server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request payload for completing a password change.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    /// Account email address.
    pub email: String,
    /// The new password.
    pub password: String,
    /// Token delivered by the password change email.
    pub change_token: String,
}

impl std::fmt::Debug for ChangePassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePassword")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("change_token", &self.change_token)
            .finish()
    }
}

/// Body returned by the auth server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Whether the server reports success.
    #[serde(default)]
    pub success: bool,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Endpoint-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl AuthResponse {
    /// The `data.authToken` field, if present.
    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.data
            .get("authToken")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
    }
}

/// Auth server endpoint names.
pub mod endpoints {
    /// Account creation.
    pub const SIGNUP: &str = "signup";
    /// Account confirmation.
    pub const CONFIRM: &str = "confirm";
    /// Email/password login.
    pub const LOGIN: &str = "login";
    /// Password change request.
    pub const CHANGE_PASSWORD_REQUEST: &str = "change-password-request";
    /// Password change completion.
    pub const CHANGE_PASSWORD: &str = "change-password";
    /// Public key publication.
    pub const PUBLIC_KEY: &str = "public-key";
}

/// Client for the auth server's endpoints.
#[derive(Clone)]
pub struct AuthApi {
    base: String,
    transport: Arc<dyn Transport>,
}

impl AuthApi {
    /// Create an API client rooted at `<server><prefix>`.
    #[must_use]
    pub fn new(base: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            transport,
        }
    }

    /// Full URL string for an endpoint.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.base)
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn signup(&self, req: &SignupRequest) -> Result<AuthResponse> {
        self.call(endpoints::SIGNUP, req).await
    }

    /// Confirm an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn confirm(&self, req: &ConfirmRequest) -> Result<AuthResponse> {
        self.call(endpoints::CONFIRM, req).await
    }

    /// Log in with email and password.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the credentials are rejected.
    pub async fn login(&self, req: &LoginRequest) -> Result<AuthResponse> {
        self.call(endpoints::LOGIN, req).await
    }

    /// Ask the server to send a password change email.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn change_password_request(
        &self,
        req: &ChangePasswordRequest,
    ) -> Result<AuthResponse> {
        self.call(endpoints::CHANGE_PASSWORD_REQUEST, req).await
    }

    /// Complete a password change.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn change_password(&self, req: &ChangePassword) -> Result<AuthResponse> {
        self.call(endpoints::CHANGE_PASSWORD, req).await
    }

    async fn call<T: Serialize + ?Sized>(&self, name: &str, req: &T) -> Result<AuthResponse> {
        let endpoint = self.endpoint(name);
        let url = Url::parse(&endpoint)
            .map_err(|e| ClientError::InvalidUrl(format!("{endpoint}: {e}")))?;
        let body = serde_json::to_value(req)?;

        tracing::debug!(endpoint = name, "Calling auth server");
        let response = self
            .transport
            .send(RequestEnvelope::new(Method::POST, url).with_body(Some(body)))
            .await?;

        Self::handle_response(response.status, response.body)
    }

    /// Normalize an auth server response.
    fn handle_response(status: u16, body: Value) -> Result<AuthResponse> {
        if let Some(message) = body.get("error").and_then(error_message) {
            tracing::debug!(status, error = %message, "Auth server returned error");
            return Err(ClientError::AuthServer(HttpError {
                message,
                status_code: Some(status),
                body,
            }));
        }

        if status >= 400 {
            return Err(ClientError::AuthServer(HttpError::from_status(status, body)));
        }

        if body.is_null() {
            return Ok(AuthResponse::default());
        }

        serde_json::from_value(body.clone()).map_err(|e| {
            ClientError::AuthServer(HttpError {
                message: format!("invalid response: {e}"),
                status_code: Some(status),
                body,
            })
        })
    }
}

impl std::fmt::Debug for AuthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthApi")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

/// Render an `error` field, which may be a string or a structured value.
fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(fields) => Some(
            fields
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string),
        ),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signup_request_serializes_camel_case_with_extras() {
        let mut extra = Map::new();
        extra.insert("from".into(), json!("noreply@example.com"));
        let req = SignupRequest {
            email: "a@b.com".into(),
            password: "p".into(),
            confirm_url: "http://x/confirm".into(),
            extra,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["confirmUrl"], "http://x/confirm");
        assert_eq!(json["from"], "noreply@example.com");
        assert!(json.get("confirm_url").is_none());
    }

    #[test]
    fn change_password_serializes_change_token() {
        let req = ChangePassword {
            email: "a@b.com".into(),
            password: "new".into(),
            change_token: "abc".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["changeToken"], "abc");
        assert!(!format!("{req:?}").contains("new\""));
    }

    #[test]
    fn login_request_debug_redacts_password() {
        let req = LoginRequest {
            email: "a@b.com".into(),
            password: "notswordfish".into(),
        };
        assert!(!format!("{req:?}").contains("notswordfish"));
    }

    #[test]
    fn auth_token_extraction() {
        let resp = AuthResponse {
            success: true,
            message: None,
            data: json!({ "authToken": "tok" }),
        };
        assert_eq!(resp.auth_token(), Some("tok"));
        assert_eq!(AuthResponse::default().auth_token(), None);
    }

    #[test]
    fn error_field_in_ok_body_is_an_error() {
        let body = json!({ "success": false, "error": "User Not Found" });
        let err = AuthApi::handle_response(200, body.clone()).unwrap_err();
        match err {
            ClientError::AuthServer(err) => {
                assert_eq!(err.message, "User Not Found");
                assert_eq!(err.status_code, Some(200));
                assert_eq!(err.body, body);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failing_status_is_an_error() {
        let err = AuthApi::handle_response(500, Value::Null).unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.to_string(), "auth server error: Received statusCode 500");
    }

    #[test]
    fn success_body_parses() {
        let body = json!({ "success": true, "data": { "authToken": "tok" } });
        let resp = AuthApi::handle_response(200, body).unwrap();
        assert!(resp.success);
        assert_eq!(resp.auth_token(), Some("tok"));
    }

    #[test]
    fn structured_error_uses_message() {
        assert_eq!(
            error_message(&json!({ "message": "nope", "code": 1 })),
            Some("nope".to_string())
        );
        assert_eq!(error_message(&Value::Null), None);
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        struct Offline;
        #[async_trait::async_trait]
        impl Transport for Offline {
            async fn send(
                &self,
                _request: RequestEnvelope,
            ) -> std::result::Result<crate::transport::Response, crate::error::TransportError> {
                Err(crate::error::TransportError::InvalidRequest("offline".into()))
            }
        }

        let api = AuthApi::new("http://localhost:3000/auth/", Arc::new(Offline));
        assert_eq!(api.endpoint("login"), "http://localhost:3000/auth/login");
    }
}
