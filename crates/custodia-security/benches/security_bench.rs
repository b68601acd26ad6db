// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for artifact sealing, integrity hashing, and audit
// logging in the custodia-security crate.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use custodia_core::types::{AuditEventKind, EventOutcome, JobId};
use custodia_security::{AuditLog, InMemoryKeyResolver, NewAuditEvent, Sealer, hash_bytes};

/// Benchmark a full seal-then-open round trip on a 10 KiB payload.
///
/// This exercises the scrypt key derivation, age encryption, decryption,
/// and the constant-time digest verification on open.
fn bench_seal_open_roundtrip(c: &mut Criterion) {
    let resolver = InMemoryKeyResolver::new().with_key("bench-key", "correct-horse-battery-staple");
    let sealer = Sealer::new(Arc::new(resolver));
    let plaintext = vec![0x42u8; 10 * 1024]; // 10 KiB

    c.bench_function("seal_open_roundtrip (10 KiB)", |b| {
        b.iter(|| {
            let sealed = sealer.seal(black_box(&plaintext), "bench-key").expect("seal failed");
            let opened = sealer.open(&sealed).expect("open failed");
            assert_eq!(opened.len(), plaintext.len());
            black_box(opened);
        });
    });
}

/// Benchmark SHA-256 integrity hashing at various batch sizes.
///
/// Sizes: 1 KiB, 10 KiB, 100 KiB, 1 MiB -- covering the range from small
/// remittance files to full claims batches.
fn bench_integrity_hash(c: &mut Criterion) {
    let sizes: &[(&str, usize)] = &[
        ("1 KiB", 1024),
        ("10 KiB", 10 * 1024),
        ("100 KiB", 100 * 1024),
        ("1 MiB", 1024 * 1024),
    ];

    let mut group = c.benchmark_group("integrity_hash_sha256");
    for &(label, size) in sizes {
        let data = vec![0xABu8; size];
        group.bench_function(label, |b| {
            b.iter(|| {
                let hex = hash_bytes(black_box(&data));
                black_box(hex);
            });
        });
    }
    group.finish();
}

/// Benchmark appending a custody event to an in-memory SQLite audit log.
///
/// Measures steady-state insertion, not schema creation.
fn bench_audit_append(c: &mut Criterion) {
    c.bench_function("audit_append (in-memory SQLite)", |b| {
        let log = AuditLog::open_in_memory().expect("open in-memory audit log");
        let job_id = JobId::new();

        b.iter(|| {
            let event =
                NewAuditEvent::new(job_id, AuditEventKind::TransferVerified, EventOutcome::Success)
                    .hop("relay")
                    .digests(
                        "abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890",
                        "abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890",
                    )
                    .principal("bench-svc")
                    .policy_version(Some(1));
            log.append(black_box(&event)).expect("append failed");
        });
    });
}

criterion_group!(
    benches,
    bench_seal_open_roundtrip,
    bench_integrity_hash,
    bench_audit_append,
);
criterion_main!(benches);
