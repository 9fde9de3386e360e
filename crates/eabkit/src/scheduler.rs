//! Record reconciliation and the background rotation scheduler
//!
//! [`Reconciler`] binds the lifecycle to the record store: it loads a
//! record, reads its service-account key material, runs one lifecycle
//! operation and persists the result only when the operation succeeded.
//! [`ReconcileScheduler`] repeats an apply pass over every configured
//! record at a fixed interval.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use eabkit_common::RecordName;
use eabkit_config::{Config, RecordConfig};

use crate::error::EabError;
use crate::lifecycle::{
    ApplyOutcome, AppliedAction, Clock, DeleteOutcome, EabIssuer, LifecycleOrchestrator,
    PlannedAction, SystemClock,
};
use crate::record::EabRecord;
use crate::storage::RecordStore;

/// Minimum interval between scheduled passes
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Read service-account key material from disk.
pub async fn read_key_material(path: &Path) -> Result<Vec<u8>, EabError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| EabError::CredentialsRead {
            path: path.to_path_buf(),
            source,
        })
}

/// Summary of an apply pass over several records.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub outcomes: Vec<(RecordName, ApplyOutcome)>,
    pub failures: Vec<(RecordName, EabError)>,
}

impl ReconcileReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Records whose stored credential changed during the pass
    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.action != AppliedAction::Unchanged)
            .count()
    }
}

/// Runs lifecycle operations against stored records.
pub struct Reconciler<I, C = SystemClock> {
    orchestrator: LifecycleOrchestrator<I, C>,
    store: RecordStore,
    config: Arc<Config>,
}

impl<I: EabIssuer, C: Clock> Reconciler<I, C> {
    pub fn new(
        orchestrator: LifecycleOrchestrator<I, C>,
        store: RecordStore,
        config: Arc<Config>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    async fn key_material_for(&self, record: &RecordConfig) -> Result<Vec<u8>, EabError> {
        let path = self.config.credentials_file_for(record).ok_or_else(|| {
            EabError::CredentialFormat(format!(
                "no credentials-file configured for record '{}'",
                record.name
            ))
        })?;
        read_key_material(path).await
    }

    /// What an apply pass would do for `record`
    pub fn plan(&self, record: &RecordConfig) -> Result<PlannedAction, EabError> {
        let stored = self.store.load(&record.name)?;
        Ok(self.orchestrator.plan(stored.as_ref(), record))
    }

    /// Run one apply pass for `record` and persist the result
    #[instrument(skip(self, record), fields(record = %record.name))]
    pub async fn apply(&self, record: &RecordConfig) -> Result<ApplyOutcome, EabError> {
        let stored = self.store.load(&record.name)?;
        let key_material = self.key_material_for(record).await?;

        let outcome = self
            .orchestrator
            .apply(&key_material, stored.as_ref(), record)
            .await?;

        if stored.as_ref() != Some(&outcome.record) {
            self.store.save(&record.name, &outcome.record)?;
        }

        debug!(action = ?outcome.action, "Applied EAB record");
        Ok(outcome)
    }

    /// Refresh a stored record against the CA, returning the refreshed
    /// record or `None` when nothing is stored yet
    #[instrument(skip(self, record), fields(record = %record.name))]
    pub async fn refresh(&self, record: &RecordConfig) -> Result<Option<EabRecord>, EabError> {
        let Some(stored) = self.store.load(&record.name)? else {
            info!("No stored EAB record to refresh");
            return Ok(None);
        };

        let key_material = self.key_material_for(record).await?;
        let refreshed = self.orchestrator.read(&key_material, &stored).await?;

        if refreshed != stored {
            self.store.save(&record.name, &refreshed)?;
        }
        Ok(Some(refreshed))
    }

    /// Remove a stored record. The CA-side key is left in place.
    pub fn forget(&self, name: &RecordName) -> Result<Option<DeleteOutcome>, EabError> {
        let Some(stored) = self.store.load(name)? else {
            return Ok(None);
        };

        let outcome = self.orchestrator.delete(&stored);
        self.store.delete(name)?;
        Ok(Some(outcome))
    }

    /// Apply every configured record in turn, continuing past failures
    pub async fn apply_all(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        info!(record_count = self.config.records.len(), "Reconciling EAB records");

        for record in &self.config.records {
            match self.apply(record).await {
                Ok(outcome) => {
                    match outcome.action {
                        AppliedAction::Unchanged => {
                            debug!(record = %record.name, "EAB credential is current")
                        }
                        action => info!(
                            record = %record.name,
                            action = ?action,
                            key_id = %outcome.record.key_id,
                            "EAB credential updated"
                        ),
                    }
                    report.outcomes.push((record.name.clone(), outcome));
                }
                Err(e) => {
                    error!(
                        record = %record.name,
                        error = %e,
                        transient = e.is_transient(),
                        "EAB reconciliation failed"
                    );
                    report.failures.push((record.name.clone(), e));
                }
            }
        }

        report
    }
}

/// Background rotation scheduler
///
/// Runs an apply pass immediately and then once per interval until the
/// shutdown future resolves.
pub struct ReconcileScheduler<I, C = SystemClock> {
    reconciler: Reconciler<I, C>,
    check_interval: Duration,
}

impl<I: EabIssuer, C: Clock> ReconcileScheduler<I, C> {
    pub fn new(reconciler: Reconciler<I, C>) -> Self {
        let check_interval = Duration::from_secs(reconciler.config().schedule.check_interval_secs)
            .max(MIN_CHECK_INTERVAL);
        Self {
            reconciler,
            check_interval,
        }
    }

    /// Set the check interval
    ///
    /// The interval is clamped to a minimum of one minute.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Run until `shutdown` resolves, returning the number of passes made
    pub async fn run<F>(self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            "Starting EAB rotation scheduler"
        );

        tokio::pin!(shutdown);

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut passes = 0u64;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(passes, "Stopping EAB rotation scheduler");
                    return passes;
                }
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let report = self.reconciler.apply_all().await;
                    passes += 1;

                    if report.is_success() {
                        info!(
                            changed = report.changed(),
                            duration_ms = start.elapsed().as_millis() as u64,
                            "EAB reconciliation pass complete"
                        );
                    } else {
                        warn!(
                            failed = report.failures.len(),
                            changed = report.changed(),
                            "EAB reconciliation pass finished with failures"
                        );
                    }
                }
            }
        }
    }
}
