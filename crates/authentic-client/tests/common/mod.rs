//! Shared fixtures: token minting, a stand-in auth server and a protected
//! resource service, both served by wiremock.

#![allow(dead_code)]

use std::sync::Arc;

use authentic_client::{AuthenticClient, Claims, ClientConfig, ReqwestTransport};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Map, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const PRIVATE_KEY: &str = include_str!("../fixtures/rsa-private.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/rsa-public.pem");
pub const OTHER_PRIVATE_KEY: &str = include_str!("../fixtures/other-private.pem");

pub const EMAIL: &str = "chet@scalehaus.io";
pub const PASSWORD: &str = "notswordfish";

/// Sign a token for `email` that expires `exp_offset` seconds from now.
pub fn sign_token(email: &str, exp_offset: i64) -> String {
    sign_with(PRIVATE_KEY, email, exp_offset)
}

/// Sign a token with an arbitrary RSA private key.
pub fn sign_with(private_pem: &str, email: &str, exp_offset: i64) -> String {
    let now = Utc::now().timestamp();
    let mut extra = Map::new();
    extra.insert("sub".to_string(), json!(email));
    let claims = Claims {
        email: Some(email.to_string()),
        exp: now + exp_offset,
        iat: Some(now),
        extra,
    };
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("fixture key");
    encode(&Header::new(Algorithm::RS256), &claims, &key).expect("token encodes")
}

/// Serve the public key from `/auth/public-key`.
pub async fn mount_public_key(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/auth/public-key"))
        .respond_with(public_key_response())
        .mount(server)
        .await;
}

pub fn public_key_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": { "publicKey": PUBLIC_KEY }
    }))
}

/// Accept `EMAIL`/`PASSWORD` at `/auth/login`, returning `token`, exactly `calls` times.
pub async fn mount_login(server: &MockServer, token: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_partial_json(json!({ "email": EMAIL, "password": PASSWORD })))
        .respond_with(auth_success(token))
        .expect(calls)
        .mount(server)
        .await;
}

pub fn auth_success(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": { "authToken": token }
    }))
}

/// An auth server with the public key mounted.
pub async fn auth_server() -> MockServer {
    let server = MockServer::start().await;
    mount_public_key(&server).await;
    server
}

/// A resource service: `/public` answers anyone, `/` demands a valid token.
pub async fn resource_service() -> MockServer {
    let service = MockServer::start().await;
    Mock::given(path("/public"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "some": "publicdoc" })))
        .mount(&service)
        .await;
    Mock::given(path("/"))
        .respond_with(ProtectedService::new())
        .mount(&service)
        .await;
    service
}

pub fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(server.uri())
}

pub fn config_with_credentials(server: &MockServer) -> ClientConfig {
    let mut config = config(server);
    config.email = Some(EMAIL.to_string());
    config.password = Some(PASSWORD.to_string());
    config
}

pub fn client(config: ClientConfig) -> AuthenticClient {
    let transport = ReqwestTransport::new(None).expect("transport");
    AuthenticClient::builder(config)
        .transport(Arc::new(transport))
        .build()
        .expect("valid config")
}

/// Requests the server received carrying an `Authorization` header.
pub async fn authorized_requests(server: &MockServer) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.headers.contains_key("authorization"))
        .collect()
}

/// Echoes the verified claims, or 403 `{"error":"forbidden"}`.
///
/// GET and DELETE answer with the claims; POST and PUT answer with
/// `{"authData": claims, "postData": body}`.
pub struct ProtectedService {
    key: DecodingKey,
}

impl ProtectedService {
    pub fn new() -> Self {
        Self {
            key: DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).expect("fixture key"),
        }
    }

    fn auth_data(&self, request: &Request) -> Option<Value> {
        let token = request
            .headers
            .get("authorization")?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        let data = decode::<Value>(token, &self.key, &validation).ok()?;
        data.claims.get("email").is_some().then_some(data.claims)
    }
}

impl Respond for ProtectedService {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(auth_data) = self.auth_data(request) else {
            return ResponseTemplate::new(403).set_body_json(json!({ "error": "forbidden" }));
        };

        match request.method.as_str() {
            "GET" | "DELETE" => ResponseTemplate::new(200).set_body_json(auth_data),
            _ => {
                let post_data: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
                ResponseTemplate::new(200).set_body_json(json!({
                    "authData": auth_data,
                    "postData": post_data,
                }))
            }
        }
    }
}
