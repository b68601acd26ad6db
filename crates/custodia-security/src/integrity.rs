// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Artifact integrity — SHA-256 hashing with constant-time comparison.

use custodia_core::error::CustodiaError;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
///
/// Used throughout Custodia to fingerprint artifacts before sealing, on
/// delivery receipts, and in audit records.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Constant-time comparison of two hex digests.
///
/// The comparison runs over the decoded digest bytes so the timing does not
/// depend on where the strings diverge. Malformed hex never matches.
pub fn digests_match(a_hex: &str, b_hex: &str) -> bool {
    let (Ok(a), Ok(b)) = (hex::decode(a_hex), hex::decode(b_hex)) else {
        return false;
    };
    ring::constant_time::verify_slices_are_equal(&a, &b).is_ok()
}

/// Verify that `data` matches the expected SHA-256 hex digest.
///
/// Returns `Ok(())` when the digest matches, or
/// `Err(CustodiaError::IntegrityMismatch)` carrying both digests when it
/// does not. A mismatch is never silently dropped to a corrupted payload.
pub fn verify_digest(data: &[u8], expected_hex: &str) -> Result<(), CustodiaError> {
    let actual = hash_bytes(data);
    if digests_match(&actual, expected_hex) {
        Ok(())
    } else {
        Err(CustodiaError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}
