//! Public CA external account key client
//!
//! Wraps the single CA operation, `externalAccountKeys.create`:
//!
//! ```text
//! POST {base}/v1beta1/projects/{project}/locations/global/externalAccountKeys
//! Content-Type: application/json
//!
//! (empty body)                                   -> issue a fresh key
//! {"name":..,"keyId":..,"b64MacKey":..}          -> rotate the given key
//! ```
//!
//! A successful response carries the same three fields with the MAC key
//! base64-encoded; [`EabClient::issue`] returns it decoded.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use eabkit_common::ProjectId;
use eabkit_config::RetryConfig;

use crate::error::EabError;
use crate::transport::{CaTransport, HttpReply};

/// Shared MAC secret of an EAB key, as raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MacKey(Vec<u8>);

impl MacKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode the wire (standard, padded base64) form
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded).map(Self)
    }

    /// Encode to the wire form
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacKey([REDACTED; {} bytes])", self.0.len())
    }
}

/// An EAB key pair as issued by the CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EabKey {
    /// CA resource name, `projects/{p}/locations/global/externalAccountKeys/{id}`
    pub name: String,
    /// Key identifier handed to the ACME client
    pub key_id: String,
    /// Decoded MAC secret
    pub mac_key: MacKey,
}

/// Wire shape shared by the rotation request and the CA response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalAccountKeyBody {
    name: String,
    key_id: String,
    b64_mac_key: String,
}

/// Retry settings for transient network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Sleep after the first failed attempt; doubles after each one
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }
}

/// Client for the CA's external account key endpoint.
#[derive(Debug, Clone)]
pub struct EabClient {
    base_url: String,
    retry: RetryPolicy,
}

impl EabClient {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Endpoint URL for a project
    pub fn endpoint(&self, project: &ProjectId) -> String {
        format!(
            "{}/v1beta1/projects/{}/locations/global/externalAccountKeys",
            self.base_url, project
        )
    }

    /// Issue an EAB key, optionally rotating `prior`.
    ///
    /// Transient network errors are retried per the [`RetryPolicy`]; HTTP
    /// error statuses are returned as [`EabError::CaApi`] without retry.
    pub async fn issue<T>(
        &self,
        transport: &T,
        project: &ProjectId,
        prior: Option<&EabKey>,
    ) -> Result<EabKey, EabError>
    where
        T: CaTransport + ?Sized,
    {
        let url = self.endpoint(project);
        let body = prior.map(rotation_body).transpose()?;

        info!(
            project = %project,
            rotating = prior.map(|k| k.key_id.as_str()),
            "Requesting external account key"
        );

        let reply = self.send_with_retry(transport, &url, body).await?;

        if reply.status != 200 {
            let body = String::from_utf8_lossy(&reply.body).into_owned();
            warn!(url = %url, status = reply.status, "CA rejected external account key request");
            return Err(EabError::CaApi {
                url,
                status: reply.status,
                body,
            });
        }

        let key = decode_response(&reply.body)?;
        info!(project = %project, key_id = %key.key_id, "Issued external account key");
        Ok(key)
    }

    async fn send_with_retry<T>(
        &self,
        transport: &T,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpReply, EabError>
    where
        T: CaTransport + ?Sized,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = self.retry.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match transport.post_json(url, body.clone()).await {
                Ok(reply) => {
                    if attempt > 1 {
                        debug!(attempt, "CA request succeeded after retry");
                    }
                    return Ok(reply);
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error calling CA, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);

                    if attempt >= max_attempts {
                        return Err(EabError::TransientNetwork {
                            attempts: attempt,
                            source: err,
                        });
                    }
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Non-transient error calling CA");
                    return Err(EabError::Network(err));
                }
            }
        }
    }
}

fn rotation_body(prior: &EabKey) -> Result<Vec<u8>, EabError> {
    let body = ExternalAccountKeyBody {
        name: prior.name.clone(),
        key_id: prior.key_id.clone(),
        b64_mac_key: prior.mac_key.to_base64(),
    };
    serde_json::to_vec(&body)
        .map_err(|e| EabError::ResponseDecode(format!("failed to encode rotation request: {}", e)))
}

fn decode_response(body: &[u8]) -> Result<EabKey, EabError> {
    let wire: ExternalAccountKeyBody = serde_json::from_slice(body)
        .map_err(|e| EabError::ResponseDecode(format!("failed to parse EAB response: {}", e)))?;

    if wire.key_id.is_empty() || wire.b64_mac_key.is_empty() {
        return Err(EabError::ResponseDecode(
            "EAB response is missing keyId or b64MacKey".to_string(),
        ));
    }

    let mac_key = MacKey::from_base64(&wire.b64_mac_key).map_err(|e| {
        EabError::ResponseDecode(format!("failed to base64-decode b64MacKey: {}", e))
    })?;

    Ok(EabKey {
        name: wire.name,
        key_id: wire.key_id,
        mac_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportErrorKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays scripted outcomes and records what was sent
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
        calls: Mutex<Vec<(Instant, String, Option<Vec<u8>>)>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<HttpReply, TransportError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Instant, String, Option<Vec<u8>>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CaTransport for ScriptedTransport {
        async fn post_json(
            &self,
            url: &str,
            body: Option<Vec<u8>>,
        ) -> Result<HttpReply, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), url.to_string(), body));
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more times than scripted")
        }
    }

    fn ok_reply(json: &str) -> Result<HttpReply, TransportError> {
        Ok(HttpReply {
            status: 200,
            body: json.as_bytes().to_vec(),
        })
    }

    fn timeout() -> Result<HttpReply, TransportError> {
        Err(TransportError::new(TransportErrorKind::Timeout, "operation timed out"))
    }

    const K1_RESPONSE: &str = r#"{"name":"projects/p/locations/global/externalAccountKeys/k1","keyId":"k1","b64MacKey":"aGVsbG8="}"#;

    fn project() -> ProjectId {
        ProjectId::new("p").unwrap()
    }

    fn client() -> EabClient {
        EabClient::new("https://publicca.googleapis.com/", RetryPolicy::default())
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            client().endpoint(&project()),
            "https://publicca.googleapis.com/v1beta1/projects/p/locations/global/externalAccountKeys"
        );
    }

    #[test]
    fn test_mac_key_base64_round_trip() {
        let raw = b"\x00\x01raw-secret\xff".to_vec();
        let key = MacKey::from_bytes(raw.clone());
        let decoded = MacKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(decoded.as_bytes(), raw.as_slice());
    }

    #[test]
    fn test_mac_key_debug_is_redacted() {
        let key = MacKey::from_bytes(b"hello".to_vec());
        assert_eq!(format!("{:?}", key), "MacKey([REDACTED; 5 bytes])");
    }

    #[tokio::test]
    async fn test_fresh_issue_sends_empty_body() {
        let transport = ScriptedTransport::new(vec![ok_reply(K1_RESPONSE)]);

        let key = client().issue(&transport, &project(), None).await.unwrap();

        assert_eq!(key.name, "projects/p/locations/global/externalAccountKeys/k1");
        assert_eq!(key.key_id, "k1");
        assert_eq!(key.mac_key.as_bytes(), b"hello");

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.ends_with("/v1beta1/projects/p/locations/global/externalAccountKeys"));
        assert_eq!(calls[0].2, None);
    }

    #[tokio::test]
    async fn test_rotation_sends_prior_key() {
        let transport = ScriptedTransport::new(vec![ok_reply(K1_RESPONSE)]);
        let prior = EabKey {
            name: "projects/p/locations/global/externalAccountKeys/k0".to_string(),
            key_id: "k0".to_string(),
            mac_key: MacKey::from_bytes(b"old-secret".to_vec()),
        };

        client().issue(&transport, &project(), Some(&prior)).await.unwrap();

        let calls = transport.calls();
        let body: serde_json::Value = serde_json::from_slice(calls[0].2.as_ref().unwrap()).unwrap();
        assert_eq!(body["name"], "projects/p/locations/global/externalAccountKeys/k0");
        assert_eq!(body["keyId"], "k0");
        let sent = STANDARD.decode(body["b64MacKey"].as_str().unwrap()).unwrap();
        assert_eq!(sent, b"old-secret");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_three_attempts_with_backoff() {
        let transport = ScriptedTransport::new(vec![timeout(), timeout(), timeout()]);
        let start = Instant::now();

        let err = client().issue(&transport, &project(), None).await.unwrap_err();

        match err {
            EabError::TransientNetwork { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.kind, TransportErrorKind::Timeout);
            }
            other => panic!("expected TransientNetwork, got {:?}", other),
        }

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].0 - calls[0].0, Duration::from_millis(500));
        assert_eq!(calls[2].0 - calls[1].0, Duration::from_millis(1000));
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::new(TransportErrorKind::Status(504), "token endpoint")),
            Err(TransportError::new(TransportErrorKind::Dns, "no such host")),
            ok_reply(K1_RESPONSE),
        ]);

        let key = client().issue(&transport, &project(), None).await.unwrap();

        assert_eq!(key.key_id, "k1");
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_network_error_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::new(
            TransportErrorKind::Connect,
            "connection refused",
        ))]);

        let err = client().issue(&transport, &project(), None).await.unwrap_err();

        assert!(matches!(err, EabError::Network(_)));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_http_error_status_not_retried() {
        for status in [400u16, 500, 503, 504] {
            let transport = ScriptedTransport::new(vec![Ok(HttpReply {
                status,
                body: br#"{"error":{"message":"bad"}}"#.to_vec(),
            })]);

            let err = client().issue(&transport, &project(), None).await.unwrap_err();

            match err {
                EabError::CaApi { url, status: got, body } => {
                    assert_eq!(got, status);
                    assert!(url.contains("/projects/p/"));
                    assert!(body.contains("bad"));
                }
                other => panic!("expected CaApi, got {:?}", other),
            }
            assert_eq!(transport.calls().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_malformed_json_response() {
        let transport = ScriptedTransport::new(vec![ok_reply("not json")]);
        let err = client().issue(&transport, &project(), None).await.unwrap_err();
        assert!(matches!(err, EabError::ResponseDecode(_)));
    }

    #[tokio::test]
    async fn test_invalid_base64_response() {
        let transport = ScriptedTransport::new(vec![ok_reply(
            r#"{"name":"n","keyId":"k","b64MacKey":"!!!not-base64!!!"}"#,
        )]);
        let err = client().issue(&transport, &project(), None).await.unwrap_err();
        assert!(matches!(err, EabError::ResponseDecode(msg) if msg.contains("base64")));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            initial_backoff_ms: 100,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
    }
}
