// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Custodia.

use thiserror::Error;

use crate::types::JobState;

/// Top-level error type for all Custodia operations.
#[derive(Debug, Error)]
pub enum CustodiaError {
    // -- Access control --
    #[error("access denied for principal '{principal}' at hop '{hop}': {reason}")]
    AuthDenied {
        principal: String,
        hop: String,
        reason: String,
    },

    #[error("policy source unavailable: {0}")]
    PolicyUnavailable(String),

    // -- Transfer errors --
    #[error("transient transfer failure: {0}")]
    TransientTransfer(String),

    #[error("transfer at hop '{hop}' timed out after {seconds}s")]
    TransferTimeout { hop: String, seconds: u64 },

    #[error("permanent transfer failure: {0}")]
    PermanentTransfer(String),

    // -- Integrity / crypto --
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("sealing failed: {0}")]
    Encryption(String),

    #[error("opening sealed artifact failed: {0}")]
    Decryption(String),

    #[error("key resolution failed for '{key_ref}': {detail}")]
    KeyResolution { key_ref: String, detail: String },

    // -- Orchestration --
    #[error("pipeline at capacity ({limit} pending jobs)")]
    ResourceExhausted { limit: usize },

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("job is already being driven by another worker")]
    JobBusy,

    #[error("job in state {state:?} cannot be retried")]
    JobNotRetryable { state: JobState },

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CustodiaError>;
