// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Processing coordinator — hands a verified artifact to the external
// transformation/storage tier and waits for a completion signal.
//
// The orchestrator treats this as the final custody hop: a transient
// failure feeds the same retry policy as any transfer hop, a permanent
// rejection (e.g. schema validation failure) fails the job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use custodia_core::error::{CustodiaError, Result};
use custodia_security::SealedArtifact;

/// Opaque handle to a submission accepted by the processing tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompletionToken(pub Uuid);

impl CompletionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Status reported by the processing tier for a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingStatus {
    Pending,
    Succeeded,
    Failed {
        reason: String,
        /// Whether the rejection is permanent (schema failure) or a
        /// transient condition worth retrying (tier overloaded).
        permanent: bool,
    },
}

/// Contract with the external transformation/storage tier.
#[async_trait]
pub trait ProcessingTier: Send + Sync {
    /// Submit a verified artifact; returns a token to poll.
    async fn submit(&self, artifact: &SealedArtifact) -> Result<CompletionToken>;

    /// Poll a previous submission.
    async fn poll(&self, token: &CompletionToken) -> Result<ProcessingStatus>;
}

/// Drives a submission to completion by polling on an interval.
pub struct ProcessingCoordinator {
    tier: Arc<dyn ProcessingTier>,
    poll_interval: Duration,
}

impl ProcessingCoordinator {
    pub fn new(tier: Arc<dyn ProcessingTier>, poll_interval: Duration) -> Self {
        Self {
            tier,
            poll_interval,
        }
    }

    /// Submit `artifact` and wait until the tier reports a terminal status.
    ///
    /// A permanent rejection maps to `PermanentTransfer`, a transient one
    /// to `TransientTransfer`; the caller applies its normal retry policy.
    #[instrument(skip_all)]
    pub async fn submit_and_wait(&self, artifact: &SealedArtifact) -> Result<()> {
        let token = self.tier.submit(artifact).await?;
        info!(token = %token.0, "artifact submitted to processing tier");

        loop {
            match self.tier.poll(&token).await? {
                ProcessingStatus::Pending => {
                    debug!(token = %token.0, "processing still pending");
                    tokio::time::sleep(self.poll_interval).await;
                }
                ProcessingStatus::Succeeded => {
                    info!(token = %token.0, "processing tier reported success");
                    return Ok(());
                }
                ProcessingStatus::Failed { reason, permanent } => {
                    return if permanent {
                        Err(CustodiaError::PermanentTransfer(format!(
                            "processing tier rejected artifact: {reason}"
                        )))
                    } else {
                        Err(CustodiaError::TransientTransfer(format!(
                            "processing tier failure: {reason}"
                        )))
                    };
                }
            }
        }
    }
}

/// Test/reference tier that accepts everything immediately, or fails with
/// a scripted status.
pub struct ScriptedTier {
    statuses: std::sync::Mutex<Vec<ProcessingStatus>>,
}

impl ScriptedTier {
    /// Always succeed on first poll.
    pub fn accepting() -> Self {
        Self {
            statuses: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Return the given statuses in order on successive polls, then succeed.
    pub fn with_statuses(statuses: Vec<ProcessingStatus>) -> Self {
        let mut reversed = statuses;
        reversed.reverse();
        Self {
            statuses: std::sync::Mutex::new(reversed),
        }
    }
}

#[async_trait]
impl ProcessingTier for ScriptedTier {
    async fn submit(&self, _artifact: &SealedArtifact) -> Result<CompletionToken> {
        Ok(CompletionToken::new())
    }

    async fn poll(&self, _token: &CompletionToken) -> Result<ProcessingStatus> {
        let mut statuses = self.statuses.lock().expect("script lock poisoned");
        Ok(statuses.pop().unwrap_or(ProcessingStatus::Succeeded))
    }
}
