//! Service-account request signing
//!
//! Turns a service-account key document into a [`SignedClient`]: an HTTP
//! client that authenticates every CA request with an OAuth2 bearer token
//! obtained through the JWT-bearer grant (RFC 7523).
//!
//! The token exchange happens lazily on the first request and is repeated
//! when the cached token is within [`TOKEN_REFRESH_MARGIN_SECS`] of expiry.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use eabkit_common::ProjectId;

use crate::error::EabError;
use crate::transport::{CaTransport, HttpReply, TransportError, TransportErrorKind};

/// OAuth scope requested for CA calls
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of a signed assertion (the maximum Google accepts)
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh the access token this long before it expires
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Maximum length for token endpoint error bodies carried in errors
const MAX_ERROR_BODY_LEN: usize = 500;

/// Service-account key document.
///
/// Only the fields the JWT-bearer grant needs are interpreted; the
/// document is otherwise treated as opaque.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub auth_uri: String,
    #[serde(default)]
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Parse a key document from raw bytes
    pub fn from_json(key_material: &[u8]) -> Result<Self, EabError> {
        serde_json::from_slice(key_material).map_err(|e| {
            EabError::CredentialFormat(format!("failed to parse service-account JSON: {}", e))
        })
    }

    /// The issuing project, which scopes the CA endpoint
    pub fn project(&self) -> Result<ProjectId, EabError> {
        ProjectId::new(self.project_id.clone()).map_err(|_| {
            EabError::CredentialFormat("service-account JSON has no project_id".to_string())
        })
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("type", &self.key_type)
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"[REDACTED]")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Claims of the JWT-bearer assertion
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Token endpoint success response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Everything needed to mint assertions
struct JwtConfig {
    client_email: String,
    private_key_id: String,
    token_uri: String,
    scope: String,
    encoding_key: EncodingKey,
}

impl JwtConfig {
    fn from_key(key: &ServiceAccountKey, scope: &str) -> Result<Self, EabError> {
        if key.client_email.is_empty() {
            return Err(EabError::SigningConfig(
                "service-account JSON has no client_email".to_string(),
            ));
        }
        if key.token_uri.is_empty() {
            return Err(EabError::SigningConfig(
                "service-account JSON has no token_uri".to_string(),
            ));
        }
        if key.private_key.is_empty() {
            return Err(EabError::SigningConfig(
                "service-account JSON has no private_key".to_string(),
            ));
        }

        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| EabError::SigningConfig(format!("invalid private_key: {}", e)))?;

        let config = Self {
            client_email: key.client_email.clone(),
            private_key_id: key.private_key_id.clone(),
            token_uri: key.token_uri.clone(),
            scope: scope.to_string(),
            encoding_key,
        };

        // Parsing the PEM does not exercise the key; signing once does
        config
            .assertion(Utc::now())
            .map_err(|e| EabError::SigningConfig(format!("private_key cannot sign: {}", e)))?;

        Ok(config)
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, jsonwebtoken::errors::Error> {
        let mut header = Header::new(Algorithm::RS256);
        if !self.private_key_id.is_empty() {
            header.kid = Some(self.private_key_id.clone());
        }

        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
    }
}

/// Cached OAuth access token
#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Builds [`SignedClient`]s from service-account key material.
pub struct CredentialSigner;

impl CredentialSigner {
    /// Derive a signed client from raw key material.
    ///
    /// # Errors
    ///
    /// - [`EabError::CredentialFormat`] if the bytes are not a service-account JSON document
    /// - [`EabError::SigningConfig`] if no JWT configuration can be derived from it
    pub fn from_key_material(
        key_material: &[u8],
        scope: &str,
        request_timeout: Duration,
    ) -> Result<SignedClient, EabError> {
        let key = ServiceAccountKey::from_json(key_material)?;
        let project = key.project()?;
        let jwt = JwtConfig::from_key(&key, scope)?;

        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EabError::SigningConfig(format!("failed to build HTTP client: {}", e)))?;

        debug!(
            project = %project,
            client_email = %jwt.client_email,
            "Derived signed CA client from service-account key"
        );

        Ok(SignedClient {
            http,
            project,
            jwt,
            token: Mutex::new(None),
        })
    }
}

/// HTTP client whose requests carry a service-account bearer token.
pub struct SignedClient {
    http: reqwest::Client,
    project: ProjectId,
    jwt: JwtConfig,
    token: Mutex<Option<AccessToken>>,
}

impl SignedClient {
    /// Project the key material belongs to
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Current bearer token, exchanging a fresh assertion when needed
    async fn bearer_token(&self) -> Result<String, TransportError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            trace!("Using cached access token");
            return Ok(token.value.clone());
        }

        let token = self.exchange_assertion(now).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn exchange_assertion(&self, now: DateTime<Utc>) -> Result<AccessToken, TransportError> {
        let assertion = self.jwt.assertion(now).map_err(|e| {
            TransportError::new(TransportErrorKind::Other, format!("failed to sign assertion: {}", e))
        })?;

        debug!(token_uri = %self.jwt.token_uri, "Exchanging JWT assertion for access token");

        let response = self
            .http
            .post(&self.jwt.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT_TYPE),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::new(
                TransportErrorKind::Status(status.as_u16()),
                format!(
                    "cannot fetch token from {}: {}",
                    self.jwt.token_uri,
                    truncate(&body, MAX_ERROR_BODY_LEN)
                ),
            ));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("invalid token endpoint response: {}", e),
            )
        })?;

        let lifetime = token_lifetime(token.expires_in);
        debug!(expires_in_secs = lifetime.num_seconds(), "Obtained access token");

        Ok(AccessToken {
            value: token.access_token,
            expires_at: now + lifetime,
        })
    }
}

/// Clamp the advertised `expires_in` to `1..=ASSERTION_LIFETIME_SECS`
fn token_lifetime(expires_in: Option<i64>) -> ChronoDuration {
    let secs = expires_in
        .unwrap_or(ASSERTION_LIFETIME_SECS)
        .clamp(1, ASSERTION_LIFETIME_SECS);
    ChronoDuration::try_seconds(secs).unwrap_or_else(ChronoDuration::zero)
}

#[async_trait]
impl CaTransport for SignedClient {
    async fn post_json(&self, url: &str, body: Option<Vec<u8>>) -> Result<HttpReply, TransportError> {
        let token = self.bearer_token().await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .body(body.unwrap_or_default())
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::body_read(&e))?
            .to_vec();

        Ok(HttpReply { status, body })
    }
}

impl fmt::Debug for SignedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedClient")
            .field("project", &self.project)
            .field("client_email", &self.jwt.client_email)
            .field("token_uri", &self.jwt.token_uri)
            .finish()
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated, {} total bytes]", &body[..end], body.len())
}
