// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hop adapter contract — the physical transfer primitive for one custody
// boundary.
//
// One adapter exists per external transfer mechanism (SFTP drop, managed
// relay, automation-tier pickup, cloud ingestion). The orchestrator only
// sees this uniform contract: move the sealed bytes to `destination` and
// report what was delivered. Transient conditions (timeouts, connection
// resets, 5xx-class responses) surface as `TransientTransfer` or
// `TransferTimeout`; rejections that retrying cannot fix surface as
// `PermanentTransfer`.

use async_trait::async_trait;

use custodia_core::error::{CustodiaError, Result};
use custodia_security::SealedArtifact;
use custodia_security::integrity::hash_bytes;

/// What a hop adapter reports after delivering bytes to the next custody
/// point.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub bytes_delivered: u64,
    /// SHA-256 hex digest of the bytes as delivered, computed at the
    /// destination side of the hop. Compared against the job's wire digest
    /// during verification.
    pub transfer_digest: String,
}

/// The transfer primitive for one hop type.
#[async_trait]
pub trait HopAdapter: Send + Sync {
    /// Deliver the sealed artifact to `destination` and return a receipt.
    async fn transfer(&self, artifact: &SealedArtifact, destination: &str)
    -> Result<TransferReceipt>;
}

/// In-process adapter that "delivers" by hashing the bytes it was handed.
///
/// The reference implementation for local pipelines and tests: the receipt
/// digest is the true digest of the delivered bytes, so verification
/// passes unless a fault is injected upstream.
#[derive(Default)]
pub struct LoopbackAdapter;

impl LoopbackAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HopAdapter for LoopbackAdapter {
    async fn transfer(
        &self,
        artifact: &SealedArtifact,
        _destination: &str,
    ) -> Result<TransferReceipt> {
        Ok(TransferReceipt {
            bytes_delivered: artifact.ciphertext.len() as u64,
            transfer_digest: hash_bytes(&artifact.ciphertext),
        })
    }
}

/// Test adapter that fails a scripted number of times before succeeding,
/// or always returns a fixed receipt digest.
pub struct ScriptedAdapter {
    failures_remaining: std::sync::Mutex<u32>,
    failure: fn() -> CustodiaError,
    /// When set, successful transfers report this digest instead of the
    /// true one (simulates corruption in transit).
    pub forced_digest: Option<String>,
    pub calls: std::sync::atomic::AtomicU32,
}

impl ScriptedAdapter {
    /// Succeed on every call.
    pub fn reliable() -> Self {
        Self::failing_times(0, || CustodiaError::TransientTransfer(String::new()))
    }

    /// Fail `n` times with `failure()`, then succeed.
    pub fn failing_times(n: u32, failure: fn() -> CustodiaError) -> Self {
        Self {
            failures_remaining: std::sync::Mutex::new(n),
            failure,
            forced_digest: None,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Succeed, but report `digest` on the receipt regardless of what was
    /// actually handed over.
    pub fn corrupting(digest: impl Into<String>) -> Self {
        let mut adapter = Self::reliable();
        adapter.forced_digest = Some(digest.into());
        adapter
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl HopAdapter for ScriptedAdapter {
    async fn transfer(
        &self,
        artifact: &SealedArtifact,
        _destination: &str,
    ) -> Result<TransferReceipt> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        {
            let mut remaining = self.failures_remaining.lock().expect("script lock poisoned");
            if *remaining > 0 {
                *remaining -= 1;
                return Err((self.failure)());
            }
        }

        let transfer_digest = self
            .forced_digest
            .clone()
            .unwrap_or_else(|| hash_bytes(&artifact.ciphertext));
        Ok(TransferReceipt {
            bytes_delivered: artifact.ciphertext.len() as u64,
            transfer_digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_artifact() -> SealedArtifact {
        SealedArtifact {
            key_ref: "k".into(),
            plaintext_digest: "00".into(),
            ciphertext: vec![1, 2, 3, 4],
        }
    }

    #[tokio::test]
    async fn loopback_reports_true_digest() {
        let adapter = LoopbackAdapter::new();
        let artifact = test_artifact();
        let receipt = adapter.transfer(&artifact, "loopback://").await.unwrap();
        assert_eq!(receipt.bytes_delivered, 4);
        assert_eq!(receipt.transfer_digest, hash_bytes(&artifact.ciphertext));
    }

    #[tokio::test]
    async fn scripted_fails_then_succeeds() {
        let adapter =
            ScriptedAdapter::failing_times(2, || CustodiaError::TransientTransfer("reset".into()));
        let artifact = test_artifact();

        assert!(adapter.transfer(&artifact, "d").await.is_err());
        assert!(adapter.transfer(&artifact, "d").await.is_err());
        assert!(adapter.transfer(&artifact, "d").await.is_ok());
        assert_eq!(adapter.call_count(), 3);
    }

    #[tokio::test]
    async fn corrupting_reports_forced_digest() {
        let adapter = ScriptedAdapter::corrupting("deadbeef");
        let receipt = adapter.transfer(&test_artifact(), "d").await.unwrap();
        assert_eq!(receipt.transfer_digest, "deadbeef");
    }
}
