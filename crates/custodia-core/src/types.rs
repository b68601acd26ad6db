// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Custodia custody pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data classification of an artifact.
///
/// Everything moving through this pipeline is claims data, so the only
/// classification in use is restricted/PHI. The enum exists so the tag is
/// carried explicitly on every artifact rather than implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "restricted-phi")]
    RestrictedPhi,
}

impl Default for Classification {
    fn default() -> Self {
        Self::RestrictedPhi
    }
}

/// Metadata describing an artifact (a claims batch payload).
///
/// Immutable once the digest is computed — any mutation of the payload
/// produces a new artifact with a new digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// SHA-256 hex digest of the plaintext payload bytes.
    pub digest: String,
    /// Payload size in bytes.
    pub size: u64,
    pub classification: Classification,
    pub created_at: DateTime<Utc>,
}

impl ArtifactMeta {
    pub fn new(digest: String, size: u64) -> Self {
        Self {
            digest,
            size,
            classification: Classification::RestrictedPhi,
            created_at: Utc::now(),
        }
    }
}

/// The kind of custody boundary a hop crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HopKind {
    /// External partner drop point (SFTP landing zone or similar).
    ExternalDrop,
    /// Managed file-transfer relay.
    Relay,
    /// On-premise automation tier.
    AutomationTier,
    /// Cloud ingestion store.
    CloudStore,
}

/// Static configuration for one custody hop.
///
/// Read-only at runtime; not owned by any job. The `principal` is the
/// service identity that performs the transfer at this boundary and is
/// what the access-control enforcer evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopDescriptor {
    /// Stable identifier, unique within the pipeline (e.g. "partner-drop").
    pub id: String,
    pub kind: HopKind,
    /// Destination the hop adapter delivers to (URI or path, adapter-defined).
    pub destination: String,
    /// Principal acting at this hop.
    pub principal: String,
    /// Transfer timeout in seconds. Expiry is a transient failure.
    pub transfer_timeout_secs: u64,
    /// Per-hop override of the pipeline retry bound.
    pub max_attempts: Option<u32>,
}

impl HopDescriptor {
    pub fn new(id: impl Into<String>, kind: HopKind, destination: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            destination: destination.into(),
            principal: "custodia-transfer".into(),
            transfer_timeout_secs: 30,
            max_attempts: None,
        }
    }
}

/// Lifecycle states of a transfer job.
///
/// A job only ever moves forward through the hop sequence; the only
/// "backward" moves are into the terminal `Quarantined` and `Failed`
/// states. Advancing to the next hop re-enters `AwaitingAuth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Accepted but not yet enqueued for its first hop.
    Created,
    /// Waiting for the access-control decision for the current hop.
    AwaitingAuth,
    /// Hop adapter is moving bytes to the next custody point.
    InTransit,
    /// Bytes delivered; integrity verification in progress.
    Verifying,
    /// Transient failure; waiting out the backoff delay.
    Retrying,
    /// Integrity could not be confirmed — terminal, manual review required.
    Quarantined,
    /// All hops and the processing tier succeeded.
    Completed,
    /// Terminal failure (auth denied, retries exhausted, permanent error,
    /// or operator cancellation).
    Failed,
}

impl JobState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Quarantined)
    }
}

/// A transfer job: one artifact's tracked passage through the hop sequence.
///
/// Owned exclusively by the orchestrator and persisted in the job state
/// store for crash recovery. Payload bytes are never stored here — only
/// digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferJob {
    pub id: JobId,
    /// SHA-256 hex digest of the plaintext artifact.
    pub artifact_digest: String,
    /// SHA-256 hex digest of the sealed bytes as they travel on the wire.
    /// This is the digest each hop's delivery receipt is checked against.
    pub wire_digest: String,
    /// Plaintext size in bytes.
    pub artifact_size: u64,
    /// Ordered hop ids this job passes through.
    pub hop_sequence: Vec<String>,
    /// Index into `hop_sequence` of the hop currently being worked.
    /// Equal to `hop_sequence.len()` once the job is at the processing tier.
    pub current_hop: usize,
    pub state: JobState,
    /// Attempts made per hop, plus a final slot for the processing tier.
    pub attempt_counters: Vec<u32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferJob {
    pub fn new(
        artifact_digest: String,
        wire_digest: String,
        artifact_size: u64,
        hop_sequence: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        // One counter per hop, one for the processing-tier stage.
        let attempt_counters = vec![0; hop_sequence.len() + 1];
        Self {
            id: JobId::new(),
            artifact_digest,
            wire_digest,
            artifact_size,
            hop_sequence,
            current_hop: 0,
            state: JobState::Created,
            attempt_counters,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Id of the hop currently being worked, or `None` once the job has
    /// advanced past the last transfer hop to the processing tier.
    pub fn current_hop_id(&self) -> Option<&str> {
        self.hop_sequence.get(self.current_hop).map(String::as_str)
    }

    /// Whether the job has cleared every transfer hop and only the
    /// processing-tier handoff remains.
    pub fn at_processing_stage(&self) -> bool {
        self.current_hop >= self.hop_sequence.len()
    }
}

/// What kind of custody event an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// Access control allowed the hop transition.
    AuthGranted,
    /// Access control denied the hop transition (terminal, never retried).
    AuthDenied,
    /// Bytes delivered and the wire digest matched.
    TransferVerified,
    /// A transient failure was absorbed and a retry scheduled.
    RetryScheduled,
    /// Delivered digest did not match — artifact quarantined.
    IntegrityViolation,
    /// Job reached `Completed`.
    JobCompleted,
    /// Job reached `Failed` (retries exhausted or permanent error).
    JobFailed,
    /// Job cancelled by operator request.
    JobCancelled,
}

impl AuditEventKind {
    /// Stable string form used in the audit store and export format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthGranted => "auth-granted",
            Self::AuthDenied => "auth-denied",
            Self::TransferVerified => "transfer-verified",
            Self::RetryScheduled => "retry-scheduled",
            Self::IntegrityViolation => "integrity-violation",
            Self::JobCompleted => "job-completed",
            Self::JobFailed => "job-failed",
            Self::JobCancelled => "job-cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "auth-granted" => Some(Self::AuthGranted),
            "auth-denied" => Some(Self::AuthDenied),
            "transfer-verified" => Some(Self::TransferVerified),
            "retry-scheduled" => Some(Self::RetryScheduled),
            "integrity-violation" => Some(Self::IntegrityViolation),
            "job-completed" => Some(Self::JobCompleted),
            "job-failed" => Some(Self::JobFailed),
            "job-cancelled" => Some(Self::JobCancelled),
            _ => None,
        }
    }
}

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOutcome {
    Success,
    Failure,
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network blip, timeout, busy endpoint — safe to retry automatically.
    Transient,
    /// Cannot be fixed by retrying — denied auth, rejected payload,
    /// integrity violation.
    Permanent,
    /// The orchestrator must stop: durable state cannot be guaranteed.
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Quarantined.is_terminal());
        assert!(!JobState::AwaitingAuth.is_terminal());
        assert!(!JobState::Retrying.is_terminal());
    }

    #[test]
    fn new_job_has_counter_per_hop_plus_processing_slot() {
        let job = TransferJob::new(
            "aa".into(),
            "bb".into(),
            128,
            vec!["drop".into(), "relay".into(), "cloud".into()],
        );
        assert_eq!(job.attempt_counters.len(), 4);
        assert_eq!(job.state, JobState::Created);
        assert_eq!(job.current_hop_id(), Some("drop"));
        assert!(!job.at_processing_stage());
    }

    #[test]
    fn processing_stage_past_last_hop() {
        let mut job = TransferJob::new("aa".into(), "bb".into(), 1, vec!["drop".into()]);
        job.current_hop = 1;
        assert!(job.at_processing_stage());
        assert_eq!(job.current_hop_id(), None);
    }

    #[test]
    fn event_kind_round_trips_through_string_form() {
        for kind in [
            AuditEventKind::AuthGranted,
            AuditEventKind::AuthDenied,
            AuditEventKind::TransferVerified,
            AuditEventKind::RetryScheduled,
            AuditEventKind::IntegrityViolation,
            AuditEventKind::JobCompleted,
            AuditEventKind::JobFailed,
            AuditEventKind::JobCancelled,
        ] {
            assert_eq!(AuditEventKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(AuditEventKind::from_str("no-such-kind"), None);
    }
}
