// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Chain-of-custody audit trail — append-only SQLite log of every job state
// transition.
//
// Schema:
//   audit_log(
//     id             INTEGER PRIMARY KEY AUTOINCREMENT,
//     job_id         TEXT    NOT NULL,
//     hop_id         TEXT,               -- NULL for job-level events
//     kind           TEXT    NOT NULL,   -- AuditEventKind string form
//     timestamp      TEXT    NOT NULL,   -- RFC 3339
//     digest_before  TEXT,               -- expected digest, if applicable
//     digest_after   TEXT,               -- observed digest, if applicable
//     outcome        INTEGER NOT NULL,   -- 0 = failure, 1 = success
//     principal      TEXT    NOT NULL,
//     policy_version INTEGER,            -- NULL when policy was unavailable
//     detail         TEXT                -- optional free-form context
//   )
//
// There is no update or delete API at any abstraction level. Retention and
// expiry belong to an external archival process; this log only grows.

use std::path::Path;

use chrono::Utc;
use custodia_core::error::CustodiaError;
use custodia_core::types::{AuditEventKind, EventOutcome, JobId};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Convert a `rusqlite::Error` into a `CustodiaError::Database`.
fn db_err(e: rusqlite::Error) -> CustodiaError {
    CustodiaError::Database(e.to_string())
}

/// A committed audit event, as read back from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub job_id: String,
    pub hop_id: Option<String>,
    pub kind: AuditEventKind,
    pub timestamp: String,
    pub digest_before: Option<String>,
    pub digest_after: Option<String>,
    pub outcome: EventOutcome,
    pub principal: String,
    pub policy_version: Option<u32>,
    pub detail: Option<String>,
}

/// An event about to be appended. The log assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub job_id: JobId,
    pub hop_id: Option<String>,
    pub kind: AuditEventKind,
    pub digest_before: Option<String>,
    pub digest_after: Option<String>,
    pub outcome: EventOutcome,
    pub principal: String,
    pub policy_version: Option<u32>,
    pub detail: Option<String>,
}

impl NewAuditEvent {
    pub fn new(job_id: JobId, kind: AuditEventKind, outcome: EventOutcome) -> Self {
        Self {
            job_id,
            hop_id: None,
            kind,
            digest_before: None,
            digest_after: None,
            outcome,
            principal: String::new(),
            policy_version: None,
            detail: None,
        }
    }

    pub fn hop(mut self, hop_id: impl Into<String>) -> Self {
        self.hop_id = Some(hop_id.into());
        self
    }

    pub fn digests(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.digest_before = Some(before.into());
        self.digest_after = Some(after.into());
        self
    }

    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    pub fn policy_version(mut self, version: Option<u32>) -> Self {
        self.policy_version = version;
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id         TEXT    NOT NULL,
    hop_id         TEXT,
    kind           TEXT    NOT NULL,
    timestamp      TEXT    NOT NULL,
    digest_before  TEXT,
    digest_after   TEXT,
    outcome        INTEGER NOT NULL,
    principal      TEXT    NOT NULL,
    policy_version INTEGER,
    detail         TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_job ON audit_log (job_id);";

const SELECT_COLUMNS: &str = "id, job_id, hop_id, kind, timestamp, digest_before,
    digest_after, outcome, principal, policy_version, detail";

/// Append-only audit log backed by a SQLite database.
///
/// A successful `append` return means the event is durably committed —
/// `synchronous = FULL` makes the insert survive power loss, so the
/// orchestrator may act on the result immediately. Events for one job are
/// totally ordered by the autoincrement id; events of concurrent jobs
/// interleave without any cross-job coordination.
pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CustodiaError> {
        let conn = Connection::open(path).map_err(db_err)?;

        // WAL for concurrent readers; FULL sync so a returned append is
        // durable before the caller proceeds to move bytes.
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("audit log opened");
        Ok(Self { conn })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self, CustodiaError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory audit log opened");
        Ok(Self { conn })
    }

    /// Append an event and return its assigned id.
    ///
    /// This is the only write operation the log exposes.
    #[instrument(skip(self, event), fields(job_id = %event.job_id, kind = event.kind.as_str()))]
    pub fn append(&self, event: &NewAuditEvent) -> Result<i64, CustodiaError> {
        let timestamp = Utc::now().to_rfc3339();
        let outcome_int: i32 = match event.outcome {
            EventOutcome::Success => 1,
            EventOutcome::Failure => 0,
        };

        self.conn
            .execute(
                "INSERT INTO audit_log (job_id, hop_id, kind, timestamp, digest_before,
                 digest_after, outcome, principal, policy_version, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.job_id.to_string(),
                    event.hop_id,
                    event.kind.as_str(),
                    timestamp,
                    event.digest_before,
                    event.digest_after,
                    outcome_int,
                    event.principal,
                    event.policy_version,
                    event.detail,
                ],
            )
            .map_err(db_err)?;

        let id = self.conn.last_insert_rowid();
        debug!(event_id = id, "audit event appended");
        Ok(id)
    }

    /// All events for one job, in the order they were appended.
    ///
    /// This is the custody-history reconstruction used for compliance
    /// review: every party that held the artifact, when, and verified how.
    pub fn events_for_job(&self, job_id: &JobId) -> Result<Vec<AuditEvent>, CustodiaError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM audit_log WHERE job_id = ?1 ORDER BY id ASC"
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![job_id.to_string()], row_to_event)
            .map_err(db_err)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(db_err)?);
        }
        Ok(events)
    }

    /// Every event in the log, in append order — the export surface for
    /// external compliance review. Read-only; exporting never mutates.
    pub fn export_all(&self) -> Result<Vec<AuditEvent>, CustodiaError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM audit_log ORDER BY id ASC"
            ))
            .map_err(db_err)?;

        let rows = stmt.query_map([], row_to_event).map_err(db_err)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(db_err)?);
        }
        Ok(events)
    }

    /// The most recent `limit` events, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<AuditEvent>, CustodiaError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM audit_log ORDER BY id DESC LIMIT ?1"
            ))
            .map_err(db_err)?;

        let rows = stmt.query_map(params![limit], row_to_event).map_err(db_err)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(db_err)?);
        }
        Ok(events)
    }

    /// Total number of events in the log.
    pub fn count(&self) -> Result<u64, CustodiaError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }
}

/// Map a SQLite row to an `AuditEvent`. Column order must match
/// `SELECT_COLUMNS`.
fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let kind_str: String = row.get(3)?;
    let kind = AuditEventKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown event kind '{kind_str}'").into(),
        )
    })?;

    let outcome = if row.get::<_, i32>(7)? != 0 {
        EventOutcome::Success
    } else {
        EventOutcome::Failure
    };

    Ok(AuditEvent {
        id: row.get(0)?,
        job_id: row.get(1)?,
        hop_id: row.get(2)?,
        kind,
        timestamp: row.get(4)?,
        digest_before: row.get(5)?,
        digest_after: row.get(6)?,
        outcome,
        principal: row.get(8)?,
        policy_version: row.get(9)?,
        detail: row.get(10)?,
    })
}
