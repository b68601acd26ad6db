// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Artifact sealing — age (X25519 / scrypt) encryption of claims payloads
// for transit and at-rest custody hops.
//
// Key material never travels with the artifact or the job record; a sealed
// artifact carries only an opaque `key_ref`. Actual material is resolved
// through the `KeyResolver` contract at the moment of sealing or opening
// and is discarded as soon as the call completes (age's `SecretString`
// zeroises on drop).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use age::secrecy::SecretString;
use custodia_core::error::{CustodiaError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::integrity::{digests_match, hash_bytes};

/// What a resolved key will be used for. Recorded by key-management
/// backends for their own audit purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    Seal,
    Open,
}

/// Contract with the external key-management service.
///
/// Implementations resolve an opaque key reference to passphrase material.
/// The returned `SecretString` is the scoped acquisition: it is dropped
/// (and zeroised) by the caller immediately after the seal/open completes.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, key_ref: &str, purpose: KeyPurpose) -> Result<SecretString>;
}

/// In-memory key resolver for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryKeyResolver {
    keys: HashMap<String, String>,
}

impl InMemoryKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key_ref: impl Into<String>, material: impl Into<String>) -> Self {
        self.keys.insert(key_ref.into(), material.into());
        self
    }
}

impl KeyResolver for InMemoryKeyResolver {
    fn resolve(&self, key_ref: &str, _purpose: KeyPurpose) -> Result<SecretString> {
        self.keys
            .get(key_ref)
            .map(|m| SecretString::from(m.clone()))
            .ok_or_else(|| CustodiaError::KeyResolution {
                key_ref: key_ref.to_owned(),
                detail: "unknown key reference".into(),
            })
    }
}

/// A sealed artifact: the unit that moves between custody hops.
///
/// Carries the ciphertext, the digest of the plaintext it encloses, and
/// the opaque reference of the key that sealed it. Never the key itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedArtifact {
    pub key_ref: String,
    /// SHA-256 hex digest of the plaintext payload.
    pub plaintext_digest: String,
    pub ciphertext: Vec<u8>,
}

impl SealedArtifact {
    /// Digest of the sealed bytes as they travel on the wire. This is what
    /// hop delivery receipts are verified against.
    pub fn wire_digest(&self) -> String {
        hash_bytes(&self.ciphertext)
    }
}

/// Seals and opens artifacts using keys resolved through a `KeyResolver`.
pub struct Sealer {
    resolver: Arc<dyn KeyResolver>,
}

impl Sealer {
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        Self { resolver }
    }

    /// Encrypt `plaintext` under the key named by `key_ref` and attach the
    /// plaintext digest.
    ///
    /// The output ciphertext is a complete age file (header + payload) that
    /// can be handed to any hop adapter as-is.
    #[instrument(skip_all, fields(key_ref = %key_ref, plaintext_len = plaintext.len()))]
    pub fn seal(&self, plaintext: &[u8], key_ref: &str) -> Result<SealedArtifact> {
        let passphrase = self.resolver.resolve(key_ref, KeyPurpose::Seal)?;
        let digest = hash_bytes(plaintext);

        let encryptor = age::Encryptor::with_user_passphrase(passphrase);
        let mut ciphertext = Vec::new();

        let mut writer = encryptor
            .wrap_output(&mut ciphertext)
            .map_err(|e| CustodiaError::Encryption(e.to_string()))?;
        writer
            .write_all(plaintext)
            .map_err(|e| CustodiaError::Encryption(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| CustodiaError::Encryption(e.to_string()))?;

        debug!(ciphertext_len = ciphertext.len(), "artifact sealed");
        Ok(SealedArtifact {
            key_ref: key_ref.to_owned(),
            plaintext_digest: digest,
            ciphertext,
        })
    }

    /// Decrypt a sealed artifact and verify its plaintext digest.
    ///
    /// The digest comparison is constant-time; a mismatch is surfaced as
    /// `IntegrityMismatch` rather than returning corrupted bytes.
    /// Idempotent — opening the same blob with the same key always yields
    /// the same result.
    #[instrument(skip_all, fields(key_ref = %sealed.key_ref, ciphertext_len = sealed.ciphertext.len()))]
    pub fn open(&self, sealed: &SealedArtifact) -> Result<Vec<u8>> {
        let passphrase = self.resolver.resolve(&sealed.key_ref, KeyPurpose::Open)?;

        let decryptor = age::Decryptor::new(&sealed.ciphertext[..])
            .map_err(|e| CustodiaError::Decryption(e.to_string()))?;

        let identity = age::scrypt::Identity::new(passphrase);

        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| CustodiaError::Decryption(e.to_string()))?;

        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| CustodiaError::Decryption(e.to_string()))?;

        let actual = hash_bytes(&plaintext);
        if !digests_match(&actual, &sealed.plaintext_digest) {
            return Err(CustodiaError::IntegrityMismatch {
                expected: sealed.plaintext_digest.clone(),
                actual,
            });
        }

        debug!(plaintext_len = plaintext.len(), "artifact opened and verified");
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sealer() -> Sealer {
        let resolver = InMemoryKeyResolver::new().with_key("batch-key-1", "correct-horse-battery-staple");
        Sealer::new(Arc::new(resolver))
    }

    #[test]
    fn seal_open_round_trip() {
        let sealer = test_sealer();
        let plaintext = b"claims batch payload #42";

        let sealed = sealer.seal(plaintext, "batch-key-1").expect("seal failed");
        assert_ne!(&sealed.ciphertext[..], plaintext);
        assert_eq!(sealed.plaintext_digest, hash_bytes(plaintext));

        let opened = sealer.open(&sealed).expect("open failed");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_is_idempotent() {
        let sealer = test_sealer();
        let sealed = sealer.seal(b"same bytes", "batch-key-1").expect("seal");

        let first = sealer.open(&sealed).expect("first open");
        let second = sealer.open(&sealed).expect("second open");
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_key_ref_fails_resolution() {
        let sealer = test_sealer();
        let result = sealer.seal(b"data", "no-such-key");
        assert!(matches!(
            result.unwrap_err(),
            CustodiaError::KeyResolution { .. }
        ));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealer_a = test_sealer();
        let sealed = sealer_a.seal(b"secret", "batch-key-1").expect("seal");

        let resolver_b = InMemoryKeyResolver::new().with_key("batch-key-1", "another-passphrase");
        let sealer_b = Sealer::new(Arc::new(resolver_b));
        assert!(sealer_b.open(&sealed).is_err());
    }

    #[test]
    fn tampered_digest_is_integrity_mismatch() {
        let sealer = test_sealer();
        let mut sealed = sealer.seal(b"original", "batch-key-1").expect("seal");
        sealed.plaintext_digest = hash_bytes(b"something else");

        match sealer.open(&sealed).unwrap_err() {
            CustodiaError::IntegrityMismatch { .. } => {}
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn wire_digest_tracks_ciphertext() {
        let sealer = test_sealer();
        let sealed = sealer.seal(b"bytes on the wire", "batch-key-1").expect("seal");
        assert_eq!(sealed.wire_digest(), hash_bytes(&sealed.ciphertext));
    }

    #[test]
    fn empty_plaintext() {
        let sealer = test_sealer();
        let sealed = sealer.seal(b"", "batch-key-1").expect("seal");
        let opened = sealer.open(&sealed).expect("open");
        assert!(opened.is_empty());
    }
}
