// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// custodia-transfer — Transfer orchestration and chain of custody.
//
// This crate moves sealed claims-batch artifacts through an ordered
// sequence of custody hops. The orchestrator drives the per-job state
// machine (access check, adapter transfer under timeout, integrity
// verification, bounded retry, terminal quarantine) over a durable
// SQLite-backed job state store, hands verified artifacts to the
// processing tier, and recovers in-flight jobs after a crash.

pub mod adapter;
pub mod alerts;
pub mod coordinator;
pub mod orchestrator;
pub mod retry;
pub mod state_store;

pub use adapter::{HopAdapter, LoopbackAdapter, ScriptedAdapter, TransferReceipt};
pub use alerts::{AlertKind, AlertSink, TracingAlertSink};
pub use coordinator::{
    CompletionToken, ProcessingCoordinator, ProcessingStatus, ProcessingTier, ScriptedTier,
};
pub use orchestrator::Orchestrator;
pub use retry::{RetryConfig, RetryDecision, classify_error, compute_delay, should_retry};
pub use state_store::JobStateStore;
