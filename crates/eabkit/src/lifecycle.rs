//! EAB credential lifecycle
//!
//! [`LifecycleOrchestrator`] drives one managed record through its states:
//!
//! ```text
//! Absent --create--> Active --read/update--> Active (unchanged)
//!                       \---update (expired)--> Active' (rotated)
//! ```
//!
//! Every operation receives the service-account key material explicitly and
//! returns a new [`EabRecord`]; the input record is never modified, so a
//! failed operation leaves the caller's state exactly as it was.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use eabkit_config::RecordConfig;

use crate::client::{EabClient, EabKey};
use crate::error::EabError;
use crate::policy::{age_days, is_expired, resolve_validity_days};
use crate::record::EabRecord;
use crate::signer::{CredentialSigner, CLOUD_PLATFORM_SCOPE};

// ============================================================================
// Seams
// ============================================================================

/// Source of EAB keys.
#[async_trait]
pub trait EabIssuer: Send + Sync {
    /// Issue a key, rotating `prior` when given
    async fn issue(&self, key_material: &[u8], prior: Option<&EabKey>) -> Result<EabKey, EabError>;
}

/// Wall clock in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// [`Clock`] backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// [`EabIssuer`] that talks to the Public CA.
///
/// A new [`SignedClient`](crate::signer::SignedClient) is derived for every
/// call, so bearer tokens are never shared between records.
#[derive(Debug, Clone)]
pub struct PublicCaIssuer {
    client: EabClient,
    request_timeout: Duration,
}

impl PublicCaIssuer {
    pub fn new(client: EabClient, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }
}

#[async_trait]
impl EabIssuer for PublicCaIssuer {
    async fn issue(&self, key_material: &[u8], prior: Option<&EabKey>) -> Result<EabKey, EabError> {
        let signed = CredentialSigner::from_key_material(
            key_material,
            CLOUD_PLATFORM_SCOPE,
            self.request_timeout,
        )?;
        let project = signed.project().clone();
        self.client.issue(&signed, &project, prior).await
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What an apply pass would do to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    /// No credential has been issued yet
    Create,
    /// The credential has outlived its window
    Rotate { age_days: i64 },
    /// The credential is still within its window
    Keep { age_days: i64, remaining_days: i64 },
}

/// What an apply pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedAction {
    /// A first credential was issued
    Created,
    /// The CA returned a different key during refresh
    Refreshed,
    /// The expired credential was rotated
    Rotated,
    /// Nothing about the issued key changed
    Unchanged,
}

/// Result of one apply pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub record: EabRecord,
    pub action: AppliedAction,
}

/// Result of removing a record.
///
/// Removal is local only. The CA offers no way to revoke an external
/// account key, so an issued key stays live there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Key id left behind at the CA, if the record had one
    pub orphaned_key_id: Option<String>,
    /// CA resource name of the orphaned key
    pub orphaned_name: Option<String>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives create, refresh, update and delete for EAB records.
pub struct LifecycleOrchestrator<I, C = SystemClock> {
    issuer: I,
    clock: C,
}

impl<I: EabIssuer> LifecycleOrchestrator<I, SystemClock> {
    pub fn new(issuer: I) -> Self {
        Self::with_clock(issuer, SystemClock)
    }
}

impl<I: EabIssuer, C: Clock> LifecycleOrchestrator<I, C> {
    pub fn with_clock(issuer: I, clock: C) -> Self {
        Self { issuer, clock }
    }

    pub fn issuer(&self) -> &I {
        &self.issuer
    }

    /// Issue a first credential for `config`.
    pub async fn create(
        &self,
        key_material: &[u8],
        config: &RecordConfig,
    ) -> Result<EabRecord, EabError> {
        let key = self.issuer.issue(key_material, None).await?;

        let mut record = EabRecord::unissued(config.expires_after_days);
        record.apply_issued(key, self.clock.now())?;

        info!(
            record = %config.name,
            key_id = %record.key_id,
            "Created EAB credential"
        );
        Ok(record)
    }

    /// Refresh check: re-issue with the stored key as the rotation hint and
    /// adopt the response only if it differs.
    ///
    /// A record that was never populated is returned as-is without
    /// contacting the CA.
    pub async fn read(&self, key_material: &[u8], record: &EabRecord) -> Result<EabRecord, EabError> {
        if record.is_unissued() {
            info!("EAB credential not created yet, skipping refresh");
            return Ok(record.clone());
        }

        let current = record.current_key();
        let key = self.issuer.issue(key_material, Some(&current)).await?;

        if record.matches(&key) {
            debug!(key_id = %record.key_id, "EAB credential unchanged");
            return Ok(record.clone());
        }

        let mut refreshed = record.clone();
        refreshed.apply_issued(key, self.clock.now())?;

        info!(
            previous_key_id = %record.key_id,
            key_id = %refreshed.key_id,
            "EAB credential changed at the CA"
        );
        Ok(refreshed)
    }

    /// Scheduled update: rotate the credential once its window has elapsed.
    ///
    /// `expires_after_days` is taken from `config` in every branch. A record
    /// that was never populated has no key to rotate and is created instead.
    pub async fn update(
        &self,
        key_material: &[u8],
        record: &EabRecord,
        config: &RecordConfig,
    ) -> Result<EabRecord, EabError> {
        if record.is_unissued() {
            info!(record = %config.name, "EAB credential not created yet, issuing a fresh one");
            return self.create(key_material, config).await;
        }

        let validity_days = resolve_validity_days(config.expires_after_days);
        let now = self.clock.now();

        if !is_expired(record.created_at, validity_days, now) {
            debug!(
                record = %config.name,
                age_days = age_days(record.created_at, now),
                validity_days,
                "EAB credential not expired"
            );
            let mut kept = record.clone();
            kept.expires_after_days = config.expires_after_days;
            return Ok(kept);
        }

        let current = record.current_key();
        let key = self.issuer.issue(key_material, Some(&current)).await?;

        let mut rotated = record.clone();
        rotated.apply_issued(key, self.clock.now())?;
        rotated.expires_after_days = config.expires_after_days;

        info!(
            record = %config.name,
            previous_key_id = %record.key_id,
            key_id = %rotated.key_id,
            validity_days,
            "Rotated expired EAB credential"
        );
        Ok(rotated)
    }

    /// Drop a record. The CA is not contacted.
    pub fn delete(&self, record: &EabRecord) -> DeleteOutcome {
        if record.is_unissued() {
            debug!("Deleted EAB record with no issued credential");
            return DeleteOutcome {
                orphaned_key_id: None,
                orphaned_name: None,
            };
        }

        warn!(
            key_id = %record.key_id,
            name = %record.name,
            "EAB key remains active at the CA; it cannot be revoked through the API"
        );
        DeleteOutcome {
            orphaned_key_id: Some(record.key_id.clone()),
            orphaned_name: Some(record.name.clone()),
        }
    }

    /// Decide what [`apply`](Self::apply) would do, without side effects.
    pub fn plan(&self, record: Option<&EabRecord>, config: &RecordConfig) -> PlannedAction {
        let Some(record) = record.filter(|r| !r.is_unissued()) else {
            return PlannedAction::Create;
        };

        let validity_days = resolve_validity_days(config.expires_after_days);
        let now = self.clock.now();
        let age = age_days(record.created_at, now);

        if is_expired(record.created_at, validity_days, now) {
            PlannedAction::Rotate { age_days: age }
        } else {
            PlannedAction::Keep {
                age_days: age,
                remaining_days: validity_days - age,
            }
        }
    }

    /// One plan/apply pass: create when absent, otherwise refresh and then
    /// run the scheduled update.
    pub async fn apply(
        &self,
        key_material: &[u8],
        record: Option<&EabRecord>,
        config: &RecordConfig,
    ) -> Result<ApplyOutcome, EabError> {
        let existing = match record.filter(|r| !r.is_unissued()) {
            Some(existing) => existing,
            None => {
                let record = self.create(key_material, config).await?;
                return Ok(ApplyOutcome {
                    record,
                    action: AppliedAction::Created,
                });
            }
        };

        let refreshed = self.read(key_material, existing).await?;
        let refresh_changed = !refreshed.matches(&existing.current_key());

        let updated = self.update(key_material, &refreshed, config).await?;
        let rotated = updated.key_id != refreshed.key_id || updated.created_at != refreshed.created_at;

        let action = if rotated {
            AppliedAction::Rotated
        } else if refresh_changed {
            AppliedAction::Refreshed
        } else {
            AppliedAction::Unchanged
        };

        Ok(ApplyOutcome {
            record: updated,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MacKey;
    use eabkit_common::RecordName;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    const DAY: i64 = 86_400;
    const T0: i64 = 1_700_000_000;
    const KEY_MATERIAL: &[u8] = br#"{"type":"service_account"}"#;

    #[derive(Clone)]
    struct TestClock(Arc<AtomicI64>);

    impl TestClock {
        fn at(now: i64) -> Self {
            Self(Arc::new(AtomicI64::new(now)))
        }

        fn set(&self, now: i64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Returns scripted keys and records every rotation hint it receives
    #[derive(Default)]
    struct FakeIssuer {
        responses: Mutex<VecDeque<Result<EabKey, EabError>>>,
        priors: Mutex<Vec<Option<EabKey>>>,
    }

    impl FakeIssuer {
        fn returning(responses: Vec<Result<EabKey, EabError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                priors: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.priors.lock().unwrap().len()
        }

        fn priors(&self) -> Vec<Option<EabKey>> {
            self.priors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EabIssuer for FakeIssuer {
        async fn issue(&self, _: &[u8], prior: Option<&EabKey>) -> Result<EabKey, EabError> {
            self.priors.lock().unwrap().push(prior.cloned());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("issuer called more times than scripted")
        }
    }

    fn key(id: &str, mac: &[u8]) -> EabKey {
        EabKey {
            name: format!("projects/p/locations/global/externalAccountKeys/{}", id),
            key_id: id.to_string(),
            mac_key: MacKey::from_bytes(mac),
        }
    }

    fn record_config(days: Option<i64>) -> RecordConfig {
        let config = RecordConfig::new(RecordName::new("default").unwrap());
        match days {
            Some(d) => config.with_expires_after_days(d),
            None => config,
        }
    }

    fn active_record(id: &str, mac: &str, created_at: i64, days: Option<i64>) -> EabRecord {
        EabRecord {
            name: format!("projects/p/locations/global/externalAccountKeys/{}", id),
            key_id: id.to_string(),
            hmac: mac.to_string(),
            created_at,
            expires_after_days: days,
        }
    }

    fn orchestrator(
        responses: Vec<Result<EabKey, EabError>>,
        now: i64,
    ) -> (LifecycleOrchestrator<FakeIssuer, TestClock>, TestClock) {
        let clock = TestClock::at(now);
        (
            LifecycleOrchestrator::with_clock(FakeIssuer::returning(responses), clock.clone()),
            clock,
        )
    }

    fn ca_error() -> EabError {
        EabError::CaApi {
            url: "https://ca.test".to_string(),
            status: 403,
            body: "denied".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_populates_record() {
        let (orch, _) = orchestrator(vec![Ok(key("k1", b"hello"))], T0);

        let record = orch.create(KEY_MATERIAL, &record_config(Some(30))).await.unwrap();

        assert_eq!(record.name, "projects/p/locations/global/externalAccountKeys/k1");
        assert_eq!(record.key_id, "k1");
        assert_eq!(record.hmac, "hello");
        assert_eq!(record.created_at, T0);
        assert_eq!(record.expires_after_days, Some(30));
        assert_eq!(orch.issuer().priors(), vec![None]);
    }

    #[tokio::test]
    async fn test_create_failure_yields_error() {
        let (orch, _) = orchestrator(vec![Err(ca_error())], T0);
        let err = orch.create(KEY_MATERIAL, &record_config(None)).await.unwrap_err();
        assert!(matches!(err, EabError::CaApi { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_read_skips_unissued_record() {
        let (orch, _) = orchestrator(vec![], T0);
        let record = EabRecord::unissued(Some(10));

        let read = orch.read(KEY_MATERIAL, &record).await.unwrap();

        assert_eq!(read, record);
        assert_eq!(orch.issuer().calls(), 0);
    }

    #[tokio::test]
    async fn test_read_unchanged_preserves_created_at() {
        let (orch, _) = orchestrator(vec![Ok(key("k1", b"hello"))], T0 + 5 * DAY);
        let record = active_record("k1", "hello", T0, None);

        let read = orch.read(KEY_MATERIAL, &record).await.unwrap();

        assert_eq!(read, record);
        let priors = orch.issuer().priors();
        let prior = priors[0].as_ref().unwrap();
        assert_eq!(prior.key_id, "k1");
        assert_eq!(prior.mac_key.as_bytes(), b"hello");
    }

    #[tokio::test]
    async fn test_read_changed_overwrites_all_fields() {
        let (orch, _) = orchestrator(vec![Ok(key("k2", b"world"))], T0 + 5 * DAY);
        let record = active_record("k1", "hello", T0, Some(60));

        let read = orch.read(KEY_MATERIAL, &record).await.unwrap();

        assert_eq!(read.key_id, "k2");
        assert_eq!(read.hmac, "world");
        assert_eq!(read.name, "projects/p/locations/global/externalAccountKeys/k2");
        assert_eq!(read.created_at, T0 + 5 * DAY);
        assert_eq!(read.expires_after_days, Some(60));
    }

    #[tokio::test]
    async fn test_read_failure_leaves_record_untouched() {
        let (orch, _) = orchestrator(vec![Err(ca_error())], T0);
        let record = active_record("k1", "hello", T0, None);
        let before = record.clone();

        assert!(orch.read(KEY_MATERIAL, &record).await.is_err());
        assert_eq!(record, before);
    }

    #[tokio::test]
    async fn test_update_not_expired_echoes_config() {
        let (orch, _) = orchestrator(vec![], T0 + 59 * DAY);
        let record = active_record("k1", "hello", T0, Some(7));

        let updated = orch
            .update(KEY_MATERIAL, &record, &record_config(Some(60)))
            .await
            .unwrap();

        assert_eq!(orch.issuer().calls(), 0);
        assert_eq!(updated.key_id, "k1");
        assert_eq!(updated.created_at, T0);
        assert_eq!(updated.expires_after_days, Some(60));
    }

    #[tokio::test]
    async fn test_update_echoes_absent_config_value() {
        let (orch, _) = orchestrator(vec![], T0 + 10 * DAY);
        let record = active_record("k1", "hello", T0, Some(30));

        let updated = orch.update(KEY_MATERIAL, &record, &record_config(None)).await.unwrap();

        assert_eq!(updated.expires_after_days, None);
    }

    #[tokio::test]
    async fn test_update_expired_rotates_with_prior() {
        let now = T0 + 61 * DAY;
        let (orch, _) = orchestrator(vec![Ok(key("k2", b"fresh"))], now);
        let record = active_record("k1", "hello", T0, Some(60));

        let updated = orch
            .update(KEY_MATERIAL, &record, &record_config(Some(60)))
            .await
            .unwrap();

        assert_eq!(updated.key_id, "k2");
        assert_eq!(updated.hmac, "fresh");
        assert_eq!(updated.name, "projects/p/locations/global/externalAccountKeys/k2");
        assert_eq!(updated.created_at, now);
        assert_eq!(updated.expires_after_days, Some(60));

        let priors = orch.issuer().priors();
        let prior = priors[0].as_ref().unwrap();
        assert_eq!(prior.key_id, "k1");
        assert_eq!(prior.mac_key.to_base64(), "aGVsbG8=");
    }

    #[tokio::test]
    async fn test_update_default_window_for_non_positive_config() {
        let (orch, _) = orchestrator(vec![], T0 + 59 * DAY);
        let record = active_record("k1", "hello", T0, None);

        let updated = orch
            .update(KEY_MATERIAL, &record, &record_config(Some(0)))
            .await
            .unwrap();

        assert_eq!(orch.issuer().calls(), 0);
        assert_eq!(updated.expires_after_days, Some(0));
    }

    #[tokio::test]
    async fn test_update_failure_leaves_record_untouched() {
        let (orch, _) = orchestrator(vec![Err(ca_error())], T0 + 90 * DAY);
        let record = active_record("k1", "hello", T0, None);
        let before = record.clone();

        assert!(orch.update(KEY_MATERIAL, &record, &record_config(None)).await.is_err());
        assert_eq!(record, before);
    }

    #[tokio::test]
    async fn test_update_unissued_record_creates() {
        let (orch, _) = orchestrator(vec![Ok(key("k1", b"hello"))], T0);
        let record = EabRecord::unissued(Some(5));

        let updated = orch
            .update(KEY_MATERIAL, &record, &record_config(Some(30)))
            .await
            .unwrap();

        assert_eq!(orch.issuer().priors(), vec![None]);
        assert_eq!(updated.key_id, "k1");
        assert_eq!(updated.created_at, T0);
        assert_eq!(updated.expires_after_days, Some(30));
    }

    #[test]
    fn test_delete_reports_orphaned_key() {
        let (orch, _) = orchestrator(vec![], T0);
        let outcome = orch.delete(&active_record("k1", "hello", T0, None));

        assert_eq!(outcome.orphaned_key_id.as_deref(), Some("k1"));
        assert_eq!(orch.issuer().calls(), 0);
    }

    #[test]
    fn test_delete_unissued_record() {
        let (orch, _) = orchestrator(vec![], T0);
        let outcome = orch.delete(&EabRecord::unissued(None));
        assert_eq!(outcome.orphaned_key_id, None);
    }

    #[test]
    fn test_plan() {
        let (orch, clock) = orchestrator(vec![], T0);
        let config = record_config(Some(60));
        let record = active_record("k1", "hello", T0, Some(60));

        assert_eq!(orch.plan(None, &config), PlannedAction::Create);
        assert_eq!(
            orch.plan(Some(&EabRecord::unissued(None)), &config),
            PlannedAction::Create
        );

        clock.set(T0 + 20 * DAY);
        assert_eq!(
            orch.plan(Some(&record), &config),
            PlannedAction::Keep {
                age_days: 20,
                remaining_days: 40
            }
        );

        clock.set(T0 + 60 * DAY);
        assert_eq!(
            orch.plan(Some(&record), &config),
            PlannedAction::Rotate { age_days: 60 }
        );
    }

    #[tokio::test]
    async fn test_apply_creates_when_absent() {
        let (orch, _) = orchestrator(vec![Ok(key("k1", b"hello"))], T0);

        let outcome = orch.apply(KEY_MATERIAL, None, &record_config(None)).await.unwrap();

        assert_eq!(outcome.action, AppliedAction::Created);
        assert_eq!(outcome.record.key_id, "k1");
    }

    #[tokio::test]
    async fn test_apply_unchanged_within_window() {
        let (orch, _) = orchestrator(vec![Ok(key("k1", b"hello"))], T0 + 10 * DAY);
        let record = active_record("k1", "hello", T0, None);

        let outcome = orch
            .apply(KEY_MATERIAL, Some(&record), &record_config(None))
            .await
            .unwrap();

        assert_eq!(outcome.action, AppliedAction::Unchanged);
        assert_eq!(outcome.record, record);
        assert_eq!(orch.issuer().calls(), 1);
    }

    #[tokio::test]
    async fn test_apply_rotates_expired() {
        let now = T0 + 61 * DAY;
        let (orch, _) = orchestrator(
            vec![Ok(key("k1", b"hello")), Ok(key("k2", b"fresh"))],
            now,
        );
        let record = active_record("k1", "hello", T0, None);

        let outcome = orch
            .apply(KEY_MATERIAL, Some(&record), &record_config(None))
            .await
            .unwrap();

        assert_eq!(outcome.action, AppliedAction::Rotated);
        assert_eq!(outcome.record.key_id, "k2");
        assert_eq!(outcome.record.created_at, now);
    }

    #[tokio::test]
    async fn test_apply_refresh_change_resets_window() {
        let now = T0 + 61 * DAY;
        let (orch, _) = orchestrator(vec![Ok(key("k2", b"world"))], now);
        let record = active_record("k1", "hello", T0, None);

        let outcome = orch
            .apply(KEY_MATERIAL, Some(&record), &record_config(None))
            .await
            .unwrap();

        assert_eq!(outcome.action, AppliedAction::Refreshed);
        assert_eq!(outcome.record.key_id, "k2");
        assert_eq!(orch.issuer().calls(), 1);
    }
}
