// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::types::HopDescriptor;

/// Static configuration for one pipeline instance.
///
/// Read-only at runtime. Retry bounds, backoff parameters, and the audit
/// retention window were left open by the requirements; the defaults below
/// are documented here rather than guessed per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ordered custody hops every job passes through.
    pub hops: Vec<HopDescriptor>,
    /// Maximum transfer attempts per hop (first attempt included).
    pub max_attempts: u32,
    /// Base backoff delay in seconds (doubles per retry).
    pub base_delay_secs: u64,
    /// Backoff delay cap in seconds.
    pub max_delay_secs: u64,
    /// Maximum number of jobs driven concurrently.
    pub concurrency_limit: usize,
    /// Admission bound: new jobs are rejected once this many are
    /// non-terminal. In-flight jobs are never aborted by backpressure.
    pub max_pending_jobs: usize,
    /// Interval in seconds between processing-tier status polls.
    pub poll_interval_secs: u64,
    /// Where quarantine alerts are directed (ticket queue, pager target).
    pub quarantine_notify_target: Option<String>,
    /// Mandated audit retention window in days. Recorded here for the
    /// external archival process; the audit log itself never deletes.
    pub audit_retention_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hops: Vec::new(),
            max_attempts: 5,
            base_delay_secs: 2,
            max_delay_secs: 120,
            concurrency_limit: 4,
            max_pending_jobs: 64,
            poll_interval_secs: 2,
            quarantine_notify_target: None,
            // Seven years — typical for claims data.
            audit_retention_days: 2557,
        }
    }
}
