// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry engine with exponential backoff + jitter for resilient transfers.
//
// Classifies errors into Transient (auto-retry), Permanent (give up), and
// Fatal (stop the orchestrator). Only transient errors trigger automatic
// retries; authorization denials and integrity violations are permanent by
// definition — retrying cannot fix tampering or a policy decision.

use std::time::Duration;

use custodia_core::config::PipelineConfig;
use custodia_core::error::CustodiaError;
use custodia_core::types::ErrorClass;
use tracing::{debug, info, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum transfer attempts per hop (first attempt included).
    pub max_attempts: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry — error is permanent or fatal.
    GiveUp(ErrorClass),
    /// Maximum attempts exhausted.
    Exhausted,
}

/// Classify a `CustodiaError` for retry decisions.
pub fn classify_error(err: &CustodiaError) -> ErrorClass {
    match err {
        // Transient — network blips, timeouts, busy endpoints
        CustodiaError::TransientTransfer(_) => ErrorClass::Transient,
        CustodiaError::TransferTimeout { .. } => ErrorClass::Transient,

        // Permanent — retrying cannot change the outcome
        CustodiaError::AuthDenied { .. } => ErrorClass::Permanent,
        CustodiaError::PolicyUnavailable(_) => ErrorClass::Permanent,
        CustodiaError::PermanentTransfer(_) => ErrorClass::Permanent,
        CustodiaError::IntegrityMismatch { .. } => ErrorClass::Permanent,
        CustodiaError::Encryption(_) => ErrorClass::Permanent,
        CustodiaError::Decryption(_) => ErrorClass::Permanent,
        CustodiaError::KeyResolution { .. } => ErrorClass::Permanent,
        CustodiaError::ResourceExhausted { .. } => ErrorClass::Permanent,
        CustodiaError::JobNotFound(_) => ErrorClass::Permanent,
        CustodiaError::JobBusy => ErrorClass::Permanent,
        CustodiaError::JobNotRetryable { .. } => ErrorClass::Permanent,
        CustodiaError::Serialization(_) => ErrorClass::Permanent,

        // Fatal — the custody guarantee depends on durable state; the
        // orchestrator must not proceed without it.
        CustodiaError::Database(_) => ErrorClass::Fatal,

        // IO errors depend on the kind
        CustodiaError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::Interrupted => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        },
    }
}

/// Decide whether to retry based on the error class and the number of
/// attempts already made.
pub fn should_retry(err: &CustodiaError, attempts: u32, config: &RetryConfig) -> RetryDecision {
    let class = classify_error(err);

    match class {
        ErrorClass::Permanent => {
            info!("permanent error — not retrying");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::Fatal => {
            warn!("fatal error — orchestrator must stop");
            RetryDecision::GiveUp(ErrorClass::Fatal)
        }
        ErrorClass::Transient => {
            if attempts >= config.max_attempts {
                warn!(attempts, max = config.max_attempts, "attempt limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempts, config);
                debug!(attempts, delay_ms = delay.as_millis(), "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Compute exponential backoff delay with jitter.
///
/// delay = min(base * 2^attempt + jitter, max_delay)
/// jitter is a spread-out value in [0, base) to prevent thundering herd.
pub fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));

    let jitter_ms = jitter(base_ms, attempt);
    let total_ms = exp_ms.saturating_add(jitter_ms);
    let capped_ms = total_ms.min(config.max_delay.as_millis() as u64);

    Duration::from_millis(capped_ms)
}

/// Deterministic jitter from a multiplicative hash of the attempt number,
/// spread across [0, base).
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        let err = CustodiaError::TransferTimeout {
            hop: "relay".into(),
            seconds: 30,
        };
        assert_eq!(classify_error(&err), ErrorClass::Transient);
    }

    #[test]
    fn auth_denied_is_permanent() {
        let err = CustodiaError::AuthDenied {
            principal: "svc".into(),
            hop: "drop".into(),
            reason: "no rule".into(),
        };
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
    }

    #[test]
    fn integrity_mismatch_is_permanent() {
        let err = CustodiaError::IntegrityMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
    }

    #[test]
    fn database_error_is_fatal() {
        let err = CustodiaError::Database("disk full".into());
        assert_eq!(classify_error(&err), ErrorClass::Fatal);
    }

    #[test]
    fn connection_reset_io_is_transient() {
        let err = CustodiaError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert_eq!(classify_error(&err), ErrorClass::Transient);
    }

    #[test]
    fn retry_respects_attempt_bound() {
        let config = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };
        let err = CustodiaError::TransientTransfer("connection refused".into());
        assert!(matches!(should_retry(&err, 1, &config), RetryDecision::RetryAfter(_)));
        assert!(matches!(should_retry(&err, 2, &config), RetryDecision::RetryAfter(_)));
        assert!(matches!(should_retry(&err, 3, &config), RetryDecision::Exhausted));
    }

    #[test]
    fn permanent_error_never_retries() {
        let config = RetryConfig::default();
        let err = CustodiaError::PermanentTransfer("schema rejected".into());
        assert!(matches!(
            should_retry(&err, 0, &config),
            RetryDecision::GiveUp(ErrorClass::Permanent)
        ));
    }

    #[test]
    fn fatal_error_gives_up_as_fatal() {
        let config = RetryConfig::default();
        let err = CustodiaError::Database("locked".into());
        assert!(matches!(
            should_retry(&err, 0, &config),
            RetryDecision::GiveUp(ErrorClass::Fatal)
        ));
    }

    #[test]
    fn delay_increases_with_attempts() {
        let config = RetryConfig::default();
        let d0 = compute_delay(0, &config);
        let d1 = compute_delay(1, &config);
        let d2 = compute_delay(2, &config);
        assert!(d1 > d0);
        assert!(d2 > d1);
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = compute_delay(20, &config);
        assert!(d <= Duration::from_secs(10));
    }
}
