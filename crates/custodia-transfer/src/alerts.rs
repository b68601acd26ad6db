// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Alert sink — integrity and authorization failures are surfaced to an
// external alerting collaborator in addition to the audit record.

use custodia_core::types::JobId;
use tracing::error;

/// Severity of an operator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Artifact quarantined — integrity could not be confirmed.
    Quarantine,
    /// Access control denied a hop transition.
    AuthDenied,
}

/// External alerting collaborator.
///
/// Implementations forward to a pager, ticket queue, or SIEM. The default
/// sink emits a structured `tracing` error event, which the embedding
/// process's subscriber can route.
pub trait AlertSink: Send + Sync {
    fn alert(&self, job_id: &JobId, kind: AlertKind, detail: &str);
}

/// Alert sink that emits tracing error events, tagged with the configured
/// quarantine notification target when one is set.
pub struct TracingAlertSink {
    notify_target: Option<String>,
}

impl TracingAlertSink {
    pub fn new(notify_target: Option<String>) -> Self {
        Self { notify_target }
    }
}

impl AlertSink for TracingAlertSink {
    fn alert(&self, job_id: &JobId, kind: AlertKind, detail: &str) {
        error!(
            job_id = %job_id,
            kind = ?kind,
            notify_target = self.notify_target.as_deref().unwrap_or("unset"),
            detail,
            "custody alert"
        );
    }
}
