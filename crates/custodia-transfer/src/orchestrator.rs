// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transfer orchestrator — the state machine that drives a sealed artifact
// through the hop sequence.
//
// Per hop: access-control check, adapter transfer under timeout, integrity
// verification, audit record. Transient failures are absorbed by bounded
// backoff; integrity violations quarantine the artifact terminally; denied
// authorization never retries. Durability ordering at every transition:
// the job state store commit lands first, the audit append returns second,
// and only then does the next hop's transfer begin.
//
// Audit mapping: each hop's auth records one AuthGranted/AuthDenied event
// and each transfer+verify couplet records one TransferVerified event, so
// a clean N-hop job leaves exactly N×2 events plus the final JobCompleted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use custodia_core::config::PipelineConfig;
use custodia_core::error::{CustodiaError, Result};
use custodia_core::types::{
    ArtifactMeta, AuditEventKind, EventOutcome, HopDescriptor, JobId, JobState, TransferJob,
};
use custodia_security::audit::{AuditEvent, AuditLog, NewAuditEvent};
use custodia_security::integrity::digests_match;
use custodia_security::policy::{Decision, Enforcer};
use custodia_security::sealing::SealedArtifact;

use crate::adapter::{HopAdapter, TransferReceipt};
use crate::alerts::{AlertKind, AlertSink, TracingAlertSink};
use crate::coordinator::ProcessingCoordinator;
use crate::retry::{RetryConfig, RetryDecision, should_retry};

/// Hop id recorded on audit events for the processing-tier stage.
const PROCESSING_STAGE_ID: &str = "processing-tier";

/// Principal recorded on job-level audit events (completion, failure,
/// cancellation) that no single hop principal owns.
const ORCHESTRATOR_PRINCIPAL: &str = "custodia-orchestrator";

/// The transfer orchestrator.
///
/// Owns the job state store and audit log exclusively. Jobs execute
/// concurrently up to `concurrency_limit`; within one job, hops are
/// strictly sequential. Backend stores are rusqlite-based (`Send` but not
/// `Sync`) and all their operations are sub-millisecond, so they sit
/// behind `Arc<Mutex<>>` rather than blocking-task indirection.
pub struct Orchestrator {
    config: PipelineConfig,
    retry: RetryConfig,
    store: Mutex<crate::state_store::JobStateStore>,
    audit: Mutex<AuditLog>,
    enforcer: Enforcer,
    adapters: HashMap<String, Arc<dyn HopAdapter>>,
    coordinator: ProcessingCoordinator,
    alerts: Arc<dyn AlertSink>,
    /// Sealed payloads for in-flight jobs, keyed by plaintext digest.
    /// Payload bytes are never persisted; after a restart the embedding
    /// process re-registers them before resuming.
    artifacts: Mutex<HashMap<String, Arc<SealedArtifact>>>,
    /// Bounded worker slots (backpressure across jobs).
    slots: Semaphore,
    /// Per-job-ID run guard: a job is driven by at most one task.
    running: Mutex<HashSet<JobId>>,
    /// Cancellation requests, honored at the AwaitingAuth checkpoint and
    /// during Retrying backoff; deferred while a transfer is in flight.
    cancel_requests: Mutex<HashSet<JobId>>,
    /// Network origin tag this process acts from, fed to policy conditions.
    network_origin: Option<String>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        store: crate::state_store::JobStateStore,
        audit: AuditLog,
        enforcer: Enforcer,
        coordinator: ProcessingCoordinator,
    ) -> Self {
        let retry = RetryConfig::from_pipeline(&config);
        let alerts = Arc::new(TracingAlertSink::new(config.quarantine_notify_target.clone()));
        let slots = Semaphore::new(config.concurrency_limit.max(1));
        Self {
            retry,
            store: Mutex::new(store),
            audit: Mutex::new(audit),
            enforcer,
            adapters: HashMap::new(),
            coordinator,
            alerts,
            artifacts: Mutex::new(HashMap::new()),
            slots,
            running: Mutex::new(HashSet::new()),
            cancel_requests: Mutex::new(HashSet::new()),
            network_origin: None,
            config,
        }
    }

    /// Bind the adapter that performs transfers for `hop_id`.
    pub fn bind_adapter(&mut self, hop_id: impl Into<String>, adapter: Arc<dyn HopAdapter>) {
        self.adapters.insert(hop_id.into(), adapter);
    }

    /// Replace the default tracing alert sink.
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = sink;
        self
    }

    /// Set the network origin tag recorded against policy conditions.
    pub fn with_network_origin(mut self, origin: impl Into<String>) -> Self {
        self.network_origin = Some(origin.into());
        self
    }

    // -- Submission and queries ---------------------------------------------

    /// Accept a sealed artifact into the pipeline and create its job.
    ///
    /// Admission is throttled: once `max_pending_jobs` jobs are
    /// non-terminal, new submissions are rejected with `ResourceExhausted`.
    /// In-flight jobs are never aborted by backpressure.
    #[instrument(skip_all, fields(digest = %meta.digest))]
    pub fn submit(&self, sealed: SealedArtifact, meta: &ArtifactMeta) -> Result<JobId> {
        if !digests_match(&sealed.plaintext_digest, &meta.digest) {
            return Err(CustodiaError::IntegrityMismatch {
                expected: meta.digest.clone(),
                actual: sealed.plaintext_digest.clone(),
            });
        }

        let limit = self.config.max_pending_jobs;
        let pending = self.store_lock().pending_count()?;
        if pending >= limit {
            warn!(pending, limit, "admission throttled");
            return Err(CustodiaError::ResourceExhausted { limit });
        }

        let hop_sequence: Vec<String> = self.config.hops.iter().map(|h| h.id.clone()).collect();
        let mut job = TransferJob::new(
            meta.digest.clone(),
            sealed.wire_digest(),
            meta.size,
            hop_sequence,
        );

        self.store_lock().insert_job(&job)?;

        // Enqueue transition.
        job.state = JobState::AwaitingAuth;
        self.store_lock().update_job(&job)?;

        self.register_artifact(sealed);
        info!(job_id = %job.id, hops = job.hop_sequence.len(), "job submitted");
        Ok(job.id)
    }

    /// Make a sealed payload available for an in-flight job (used after
    /// crash recovery, where only digests survive in the state store).
    pub fn register_artifact(&self, sealed: SealedArtifact) {
        self.artifacts
            .lock()
            .expect("artifacts lock poisoned")
            .insert(sealed.plaintext_digest.clone(), Arc::new(sealed));
    }

    /// Current record for one job.
    pub fn job(&self, job_id: &JobId) -> Result<Option<TransferJob>> {
        self.store_lock().get_job(job_id)
    }

    /// All job records, newest first.
    pub fn all_jobs(&self) -> Result<Vec<TransferJob>> {
        self.store_lock().all_jobs()
    }

    /// The full ordered custody history for one job.
    pub fn custody_history(&self, job_id: &JobId) -> Result<Vec<AuditEvent>> {
        self.audit_lock().events_for_job(job_id)
    }

    // -- Cancellation and manual retry --------------------------------------

    /// Request cancellation of a job.
    ///
    /// Honored at the next AwaitingAuth checkpoint or during Retrying
    /// backoff; a transfer already in flight resolves first, so the
    /// artifact is never abandoned in an unrecorded state.
    pub fn cancel(&self, job_id: &JobId) -> Result<()> {
        let job = self
            .store_lock()
            .get_job(job_id)?
            .ok_or_else(|| CustodiaError::JobNotFound(job_id.to_string()))?;
        if job.state.is_terminal() {
            return Err(CustodiaError::JobNotRetryable { state: job.state });
        }

        self.cancel_requests
            .lock()
            .expect("cancel lock poisoned")
            .insert(*job_id);
        info!(job_id = %job_id, "cancellation requested");
        Ok(())
    }

    /// Re-enqueue a `Failed` job at its recorded hop.
    ///
    /// Quarantined jobs are rejected: an artifact whose integrity could
    /// not be confirmed requires manual review, never an automatic or
    /// operator-triggered resend.
    pub fn retry_failed(&self, job_id: &JobId) -> Result<()> {
        let mut job = self
            .store_lock()
            .get_job(job_id)?
            .ok_or_else(|| CustodiaError::JobNotFound(job_id.to_string()))?;

        match job.state {
            JobState::Failed => {
                let hop_slot = job.current_hop.min(job.attempt_counters.len() - 1);
                job.attempt_counters[hop_slot] = 0;
                job.state = JobState::AwaitingAuth;
                job.error_message = None;
                self.store_lock().update_job(&job)?;
                info!(job_id = %job_id, hop = job.current_hop, "failed job re-enqueued");
                Ok(())
            }
            state => Err(CustodiaError::JobNotRetryable { state }),
        }
    }

    // -- Crash recovery ------------------------------------------------------

    /// Reload all non-terminal jobs after a restart.
    ///
    /// Every recovered job is reset to `AwaitingAuth` at its recorded hop:
    /// authorization is never assumed to still hold across a restart,
    /// since policy may have changed while the process was down. Returns
    /// the ids needing payload re-registration and a new `run` call.
    #[instrument(skip(self))]
    pub fn recover(&self) -> Result<Vec<JobId>> {
        let jobs = self.store_lock().non_terminal_jobs()?;
        let mut recovered = Vec::with_capacity(jobs.len());

        for mut job in jobs {
            job.state = JobState::AwaitingAuth;
            self.store_lock().update_job(&job)?;
            info!(job_id = %job.id, hop = job.current_hop, "job recovered to re-authorization");
            recovered.push(job.id);
        }
        Ok(recovered)
    }

    // -- Driving jobs --------------------------------------------------------

    /// Drive every non-terminal job to a terminal state, concurrently up
    /// to the configured limit.
    pub async fn run_all(self: Arc<Self>) -> Result<Vec<(JobId, JobState)>> {
        let pending = self.store_lock().non_terminal_jobs()?;
        let mut set = JoinSet::new();

        for job in pending {
            let this = Arc::clone(&self);
            set.spawn(async move {
                let state = this.run(&job.id).await;
                (job.id, state)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (id, state) = joined.map_err(|e| CustodiaError::Database(format!("worker panicked: {e}")))?;
            results.push((id, state?));
        }
        Ok(results)
    }

    /// Drive one job to a terminal state and return it.
    ///
    /// Acquires a worker slot (backpressure) and the per-job run guard.
    /// Fatal errors (state store unavailable) propagate — the orchestrator
    /// never proceeds without durable state.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: &JobId) -> Result<JobState> {
        let _permit = self.slots.acquire().await.expect("worker semaphore closed");
        let _guard = RunGuard::acquire(&self.running, *job_id)?;

        let mut job = self
            .store_lock()
            .get_job(job_id)?
            .ok_or_else(|| CustodiaError::JobNotFound(job_id.to_string()))?;

        if job.state.is_terminal() {
            return Ok(job.state);
        }
        if job.state == JobState::Created {
            job.state = JobState::AwaitingAuth;
            self.store_lock().update_job(&job)?;
        }

        // Transfer+verify couplet state carried between loop arms.
        let mut receipt: Option<TransferReceipt> = None;
        let mut backoff: Option<Duration> = None;

        loop {
            match job.state {
                JobState::AwaitingAuth => {
                    if self.take_cancel_request(&job.id) {
                        return self.finish_cancelled(&mut job);
                    }
                    if job.at_processing_stage() {
                        return self.processing_stage(&mut job).await;
                    }
                    if let Some(state) = self.authorize_hop(&mut job)? {
                        return Ok(state);
                    }
                }

                JobState::InTransit => {
                    match self.transfer_hop(&mut job).await? {
                        TransferOutcome::Delivered(r) => {
                            receipt = Some(r);
                            job.state = JobState::Verifying;
                            self.store_lock().update_job(&job)?;
                        }
                        TransferOutcome::RetryAfter(delay) => backoff = Some(delay),
                        TransferOutcome::Terminal(state) => return Ok(state),
                    }
                }

                JobState::Verifying => {
                    match receipt.take() {
                        Some(r) => {
                            if let Some(state) = self.verify_hop(&mut job, &r)? {
                                return Ok(state);
                            }
                        }
                        None => {
                            // No receipt in hand (resumed mid-verify without
                            // recovery); re-drive the hop's transfer.
                            job.state = JobState::InTransit;
                            self.store_lock().update_job(&job)?;
                        }
                    }
                }

                JobState::Retrying => {
                    if self.take_cancel_request(&job.id) {
                        return self.finish_cancelled(&mut job);
                    }
                    let delay = backoff.take().unwrap_or_else(|| {
                        let slot = self.attempt_slot(&job);
                        crate::retry::compute_delay(job.attempt_counters[slot], &self.retry)
                    });
                    tokio::time::sleep(delay).await;
                    if self.take_cancel_request(&job.id) {
                        return self.finish_cancelled(&mut job);
                    }
                    job.state = JobState::InTransit;
                    self.store_lock().update_job(&job)?;
                }

                JobState::Completed | JobState::Failed | JobState::Quarantined => {
                    return Ok(job.state);
                }

                JobState::Created => {
                    job.state = JobState::AwaitingAuth;
                    self.store_lock().update_job(&job)?;
                }
            }
        }
    }

    // -- Per-hop phases ------------------------------------------------------

    /// Access-control check for the current hop. Returns the terminal
    /// state when the job ends here (denied), `None` to continue.
    fn authorize_hop(&self, job: &mut TransferJob) -> Result<Option<JobState>> {
        let hop = match self.hop_descriptor(job) {
            Ok(h) => h,
            Err(e) => return self.fail_job(job, &e).map(Some),
        };

        let (decision, version) =
            self.enforcer
                .authorize(&hop.principal, &hop.id, self.network_origin.as_deref());

        match decision {
            Decision::Allow => {
                job.state = JobState::InTransit;
                self.store_lock().update_job(job)?;
                self.append_audit(
                    NewAuditEvent::new(job.id, AuditEventKind::AuthGranted, EventOutcome::Success)
                        .hop(hop.id.clone())
                        .principal(hop.principal.clone())
                        .policy_version(version),
                )?;
                Ok(None)
            }
            Decision::Deny { reason } => {
                job.state = JobState::Failed;
                job.error_message = Some(format!("access denied at hop '{}': {reason}", hop.id));
                self.store_lock().update_job(job)?;
                self.append_audit(
                    NewAuditEvent::new(job.id, AuditEventKind::AuthDenied, EventOutcome::Failure)
                        .hop(hop.id.clone())
                        .principal(hop.principal.clone())
                        .policy_version(version)
                        .detail(reason.clone()),
                )?;
                self.alerts.alert(&job.id, AlertKind::AuthDenied, &reason);
                warn!(job_id = %job.id, hop = %hop.id, "authorization denied — job failed");
                Ok(Some(JobState::Failed))
            }
        }
    }

    /// One transfer attempt for the current hop, under its timeout.
    async fn transfer_hop(&self, job: &mut TransferJob) -> Result<TransferOutcome> {
        let hop = match self.hop_descriptor(job) {
            Ok(h) => h,
            Err(e) => return self.fail_job(job, &e).map(TransferOutcome::Terminal),
        };
        let sealed = match self.artifact_for(job) {
            Ok(s) => s,
            Err(e) => return self.fail_job(job, &e).map(TransferOutcome::Terminal),
        };

        let slot = job.current_hop;
        job.attempt_counters[slot] += 1;
        self.store_lock().update_job(job)?;

        let Some(adapter) = self.adapters.get(&hop.id) else {
            let err = CustodiaError::PermanentTransfer(format!("no adapter bound for hop '{}'", hop.id));
            return self.fail_job(job, &err).map(TransferOutcome::Terminal);
        };

        let timeout = Duration::from_secs(hop.transfer_timeout_secs);
        debug!(job_id = %job.id, hop = %hop.id, attempt = job.attempt_counters[slot], "starting transfer");

        let result = tokio::time::timeout(timeout, adapter.transfer(&sealed, &hop.destination)).await;
        let err = match result {
            Ok(Ok(r)) => return Ok(TransferOutcome::Delivered(r)),
            Ok(Err(e)) => e,
            Err(_) => CustodiaError::TransferTimeout {
                hop: hop.id.clone(),
                seconds: hop.transfer_timeout_secs,
            },
        };

        self.absorb_transfer_failure(job, &hop.id, &hop.principal, err, Some(&hop))
            .await
    }

    /// Verify the delivered digest against the job's wire digest. Returns
    /// the terminal state when the job ends here (quarantine), `None` to
    /// continue to the next hop.
    fn verify_hop(&self, job: &mut TransferJob, receipt: &TransferReceipt) -> Result<Option<JobState>> {
        let hop_id = job
            .current_hop_id()
            .unwrap_or(PROCESSING_STAGE_ID)
            .to_owned();
        let principal = self
            .hop_descriptor(job)
            .map(|h| h.principal.clone())
            .unwrap_or_else(|_| ORCHESTRATOR_PRINCIPAL.to_owned());

        if digests_match(&receipt.transfer_digest, &job.wire_digest) {
            let expected = job.wire_digest.clone();
            job.current_hop += 1;
            job.state = JobState::AwaitingAuth;
            self.store_lock().update_job(job)?;
            self.append_audit(
                NewAuditEvent::new(job.id, AuditEventKind::TransferVerified, EventOutcome::Success)
                    .hop(hop_id.clone())
                    .digests(expected, receipt.transfer_digest.clone())
                    .principal(principal)
                    .detail(format!("{} bytes delivered", receipt.bytes_delivered)),
            )?;
            info!(job_id = %job.id, hop = %hop_id, "hop verified — advancing");
            Ok(None)
        } else {
            job.state = JobState::Quarantined;
            job.error_message = Some(format!(
                "digest mismatch at hop '{hop_id}': expected {}, got {}",
                job.wire_digest, receipt.transfer_digest
            ));
            self.store_lock().update_job(job)?;
            self.append_audit(
                NewAuditEvent::new(job.id, AuditEventKind::IntegrityViolation, EventOutcome::Failure)
                    .hop(hop_id.clone())
                    .digests(job.wire_digest.clone(), receipt.transfer_digest.clone())
                    .principal(principal)
                    .detail("artifact quarantined pending manual review"),
            )?;
            self.alerts.alert(
                &job.id,
                AlertKind::Quarantine,
                job.error_message.as_deref().unwrap_or("digest mismatch"),
            );
            warn!(job_id = %job.id, hop = %hop_id, "integrity violation — quarantined");
            Ok(Some(JobState::Quarantined))
        }
    }

    /// Final custody stage: hand the verified artifact to the processing
    /// tier, with the same retry policy as any hop.
    async fn processing_stage(&self, job: &mut TransferJob) -> Result<JobState> {
        let sealed = match self.artifact_for(job) {
            Ok(s) => s,
            Err(e) => return self.fail_job(job, &e),
        };

        loop {
            if self.take_cancel_request(&job.id) {
                return self.finish_cancelled(job);
            }

            let slot = self.attempt_slot(job);
            job.attempt_counters[slot] += 1;
            job.state = JobState::InTransit;
            self.store_lock().update_job(job)?;

            match self.coordinator.submit_and_wait(&sealed).await {
                Ok(()) => {
                    job.state = JobState::Completed;
                    job.error_message = None;
                    self.store_lock().update_job(job)?;
                    self.append_audit(
                        NewAuditEvent::new(job.id, AuditEventKind::JobCompleted, EventOutcome::Success)
                            .hop(PROCESSING_STAGE_ID)
                            .principal(ORCHESTRATOR_PRINCIPAL)
                            .detail("all hops verified; processing complete"),
                    )?;
                    info!(job_id = %job.id, "job completed");
                    return Ok(JobState::Completed);
                }
                Err(err) => {
                    match self
                        .absorb_transfer_failure(job, PROCESSING_STAGE_ID, ORCHESTRATOR_PRINCIPAL, err, None)
                        .await?
                    {
                        TransferOutcome::RetryAfter(delay) => {
                            tokio::time::sleep(delay).await;
                            // Loop re-checks cancellation, then resubmits.
                        }
                        TransferOutcome::Terminal(state) => return Ok(state),
                        TransferOutcome::Delivered(_) => unreachable!("failure path yields no receipt"),
                    }
                }
            }
        }
    }

    // -- Failure handling ----------------------------------------------------

    /// Apply the retry policy to a failed transfer attempt. Persists the
    /// resulting state and writes the matching audit record.
    async fn absorb_transfer_failure(
        &self,
        job: &mut TransferJob,
        hop_id: &str,
        principal: &str,
        err: CustodiaError,
        hop: Option<&HopDescriptor>,
    ) -> Result<TransferOutcome> {
        let slot = self.attempt_slot(job);
        let attempts = job.attempt_counters[slot];
        let cfg = self.effective_retry(hop);

        match should_retry(&err, attempts, &cfg) {
            RetryDecision::RetryAfter(delay) => {
                job.state = JobState::Retrying;
                job.error_message = Some(err.to_string());
                self.store_lock().update_job(job)?;
                self.append_audit(
                    NewAuditEvent::new(job.id, AuditEventKind::RetryScheduled, EventOutcome::Failure)
                        .hop(hop_id)
                        .principal(principal)
                        .detail(format!(
                            "attempt {attempts} failed ({err}); retrying in {}ms",
                            delay.as_millis()
                        )),
                )?;
                Ok(TransferOutcome::RetryAfter(delay))
            }
            RetryDecision::Exhausted => {
                let detail = format!("attempt limit reached after {attempts} attempts: {err}");
                self.fail_job_with_detail(job, &detail)
                    .map(TransferOutcome::Terminal)
            }
            RetryDecision::GiveUp(custodia_core::types::ErrorClass::Fatal) => Err(err),
            RetryDecision::GiveUp(_) => self.fail_job(job, &err).map(TransferOutcome::Terminal),
        }
    }

    /// Move a job to `Failed` with a `JobFailed` audit record.
    fn fail_job(&self, job: &mut TransferJob, err: &CustodiaError) -> Result<JobState> {
        self.fail_job_with_detail(job, &err.to_string())
    }

    fn fail_job_with_detail(&self, job: &mut TransferJob, detail: &str) -> Result<JobState> {
        job.state = JobState::Failed;
        job.error_message = Some(detail.to_owned());
        self.store_lock().update_job(job)?;
        self.append_audit(
            NewAuditEvent::new(job.id, AuditEventKind::JobFailed, EventOutcome::Failure)
                .hop(job.current_hop_id().unwrap_or(PROCESSING_STAGE_ID))
                .principal(ORCHESTRATOR_PRINCIPAL)
                .detail(detail),
        )?;
        warn!(job_id = %job.id, detail, "job failed");
        Ok(JobState::Failed)
    }

    /// Move a job to `Failed` as a recorded cancellation.
    fn finish_cancelled(&self, job: &mut TransferJob) -> Result<JobState> {
        job.state = JobState::Failed;
        job.error_message = Some("cancelled by operator".into());
        self.store_lock().update_job(job)?;
        self.append_audit(
            NewAuditEvent::new(job.id, AuditEventKind::JobCancelled, EventOutcome::Failure)
                .hop(job.current_hop_id().unwrap_or(PROCESSING_STAGE_ID))
                .principal(ORCHESTRATOR_PRINCIPAL)
                .detail("cancelled by operator"),
        )?;
        info!(job_id = %job.id, "job cancelled");
        Ok(JobState::Failed)
    }

    // -- Helpers -------------------------------------------------------------

    fn store_lock(&self) -> std::sync::MutexGuard<'_, crate::state_store::JobStateStore> {
        self.store.lock().expect("state store lock poisoned")
    }

    fn audit_lock(&self) -> std::sync::MutexGuard<'_, AuditLog> {
        self.audit.lock().expect("audit lock poisoned")
    }

    fn append_audit(&self, event: NewAuditEvent) -> Result<i64> {
        self.audit_lock().append(&event)
    }

    fn hop_descriptor(&self, job: &TransferJob) -> Result<HopDescriptor> {
        let hop_id = job
            .current_hop_id()
            .ok_or_else(|| CustodiaError::PermanentTransfer("job has no current hop".into()))?;
        self.config
            .hops
            .iter()
            .find(|h| h.id == hop_id)
            .cloned()
            .ok_or_else(|| {
                CustodiaError::PermanentTransfer(format!("no descriptor for hop '{hop_id}'"))
            })
    }

    fn artifact_for(&self, job: &TransferJob) -> Result<Arc<SealedArtifact>> {
        self.artifacts
            .lock()
            .expect("artifacts lock poisoned")
            .get(&job.artifact_digest)
            .cloned()
            .ok_or_else(|| {
                CustodiaError::PermanentTransfer(format!(
                    "payload for digest {} not registered",
                    job.artifact_digest
                ))
            })
    }

    /// Attempt-counter slot for the job's current stage (hop index, or the
    /// trailing processing-tier slot).
    fn attempt_slot(&self, job: &TransferJob) -> usize {
        job.current_hop.min(job.attempt_counters.len() - 1)
    }

    fn effective_retry(&self, hop: Option<&HopDescriptor>) -> RetryConfig {
        let mut cfg = self.retry.clone();
        if let Some(max) = hop.and_then(|h| h.max_attempts) {
            cfg.max_attempts = max;
        }
        cfg
    }

    fn take_cancel_request(&self, job_id: &JobId) -> bool {
        self.cancel_requests
            .lock()
            .expect("cancel lock poisoned")
            .remove(job_id)
    }
}

/// Outcome of one transfer attempt after retry policy is applied.
enum TransferOutcome {
    Delivered(TransferReceipt),
    RetryAfter(Duration),
    Terminal(JobState),
}

/// Removes the job from the running set when the driving task exits,
/// whatever the exit path.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<JobId>>,
    job_id: JobId,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<JobId>>, job_id: JobId) -> Result<Self> {
        let inserted = running.lock().expect("running lock poisoned").insert(job_id);
        if !inserted {
            return Err(CustodiaError::JobBusy);
        }
        Ok(Self { running, job_id })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .expect("running lock poisoned")
            .remove(&self.job_id);
    }
}
