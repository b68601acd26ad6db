// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// custodia-security — Cryptographic foundation for the custody pipeline.
//
// This crate provides the security primitives the transfer orchestrator
// invokes at every hop boundary: artifact sealing (age encryption with
// key-reference indirection), SHA-256 integrity verification with
// constant-time comparison, versioned fail-closed access policy, and the
// tamper-evident append-only audit trail.

pub mod audit;
pub mod integrity;
pub mod policy;
pub mod sealing;

pub use audit::{AuditEvent, AuditLog, NewAuditEvent};
pub use integrity::{digests_match, hash_bytes, verify_digest};
pub use policy::{AccessPolicy, Decision, Enforcer, PolicySource, StaticPolicySource};
pub use sealing::{InMemoryKeyResolver, KeyPurpose, KeyResolver, SealedArtifact, Sealer};
