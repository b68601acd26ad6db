// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable job state store backed by SQLite.
//
// The store holds all transfer-job metadata (but NOT the payload bytes) so
// that jobs survive process restarts. Payloads are referenced by their
// digests only. Terminal records are retained for the mandated retention
// period — there is deliberately no delete API; archival is external.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};

use custodia_core::error::{CustodiaError, Result};
use custodia_core::types::{JobId, JobState, TransferJob};

/// SQLite schema for the jobs table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        artifact_digest TEXT NOT NULL,
        wire_digest TEXT NOT NULL,
        artifact_size INTEGER NOT NULL,
        hop_sequence TEXT NOT NULL,
        current_hop INTEGER NOT NULL DEFAULT 0,
        state TEXT NOT NULL,
        attempt_counters TEXT NOT NULL DEFAULT '[]',
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

const SELECT_COLUMNS: &str = "id, artifact_digest, wire_digest, artifact_size, hop_sequence,
    current_hop, state, attempt_counters, error_message, created_at, updated_at";

/// Persistent job state store.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively; operations are sub-millisecond, so callers hold the store
/// behind an `Arc<Mutex<>>` rather than spawning blocking tasks.
pub struct JobStateStore {
    conn: Connection,
}

impl JobStateStore {
    /// Open (or create) the job database at the given path.
    ///
    /// WAL journal mode for concurrent readers; FULL sync so a committed
    /// transition survives an unclean shutdown — the custody guarantee
    /// depends on never losing a recorded state.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| CustodiaError::Database(format!("open: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
            .map_err(|e| CustodiaError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| CustodiaError::Database(format!("create table: {e}")))?;

        info!("job state store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CustodiaError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| CustodiaError::Database(format!("create table: {e}")))?;

        debug!("in-memory job state store opened");
        Ok(Self { conn })
    }

    /// Insert a new transfer job.
    ///
    /// The job's `id`, `created_at`, and `updated_at` fields must already be
    /// populated (they are set by `TransferJob::new`).
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn insert_job(&self, job: &TransferJob) -> Result<()> {
        let state_json = serde_json::to_string(&job.state)?;
        let hops_json = serde_json::to_string(&job.hop_sequence)?;
        let counters_json = serde_json::to_string(&job.attempt_counters)?;

        self.conn
            .execute(
                "INSERT INTO jobs (id, artifact_digest, wire_digest, artifact_size,
                 hop_sequence, current_hop, state, attempt_counters, error_message,
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    job.id.to_string(),
                    job.artifact_digest,
                    job.wire_digest,
                    job.artifact_size as i64,
                    hops_json,
                    job.current_hop as i64,
                    state_json,
                    counters_json,
                    job.error_message,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| CustodiaError::Database(format!("insert job: {e}")))?;

        info!(job_id = %job.id, "job inserted into state store");
        Ok(())
    }

    /// Persist a job's mutable fields (state, hop index, counters, error).
    ///
    /// Bumps `updated_at` to the current time. The durable commit of this
    /// update is what makes the corresponding state transition official.
    #[instrument(skip(self, job), fields(job_id = %job.id, state = ?job.state))]
    pub fn update_job(&self, job: &TransferJob) -> Result<()> {
        let state_json = serde_json::to_string(&job.state)?;
        let counters_json = serde_json::to_string(&job.attempt_counters)?;
        let now = Utc::now().to_rfc3339();

        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, current_hop = ?2, attempt_counters = ?3,
                 error_message = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    state_json,
                    job.current_hop as i64,
                    counters_json,
                    job.error_message,
                    now,
                    job.id.to_string(),
                ],
            )
            .map_err(|e| CustodiaError::Database(format!("update job: {e}")))?;

        if rows == 0 {
            return Err(CustodiaError::JobNotFound(job.id.to_string()));
        }

        debug!(job_id = %job.id, "job state persisted");
        Ok(())
    }

    /// Retrieve a single job by its ID. Returns `None` if absent.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn get_job(&self, job_id: &JobId) -> Result<Option<TransferJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?1"))
            .map_err(|e| CustodiaError::Database(format!("prepare get_job: {e}")))?;

        let mut rows = stmt
            .query_map(params![job_id.to_string()], row_to_job)
            .map_err(|e| CustodiaError::Database(format!("query get_job: {e}")))?;

        match rows.next() {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => Err(CustodiaError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    /// All jobs, newest first — the operator-visible query surface.
    #[instrument(skip(self))]
    pub fn all_jobs(&self) -> Result<Vec<TransferJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM jobs ORDER BY created_at DESC"
            ))
            .map_err(|e| CustodiaError::Database(format!("prepare all_jobs: {e}")))?;

        let jobs = stmt
            .query_map([], row_to_job)
            .map_err(|e| CustodiaError::Database(format!("query all_jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CustodiaError::Database(format!("collect rows: {e}")))?;

        debug!(count = jobs.len(), "retrieved all jobs");
        Ok(jobs)
    }

    /// All non-terminal jobs, oldest first — the recovery set reloaded
    /// after a process restart.
    ///
    /// Filtered in SQL: terminal records are retained forever, so scanning
    /// the whole table would slow down with pipeline history.
    #[instrument(skip(self))]
    pub fn non_terminal_jobs(&self) -> Result<Vec<TransferJob>> {
        let [done, failed, quarantined] = terminal_state_params()?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM jobs
                 WHERE state NOT IN (?1, ?2, ?3) ORDER BY created_at ASC"
            ))
            .map_err(|e| CustodiaError::Database(format!("prepare non_terminal_jobs: {e}")))?;

        let jobs = stmt
            .query_map(params![done, failed, quarantined], row_to_job)
            .map_err(|e| CustodiaError::Database(format!("query non_terminal_jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CustodiaError::Database(format!("collect rows: {e}")))?;

        debug!(count = jobs.len(), "retrieved non-terminal jobs");
        Ok(jobs)
    }

    /// Number of non-terminal jobs, used for admission control. Counted in
    /// SQL so admission stays constant-cost as terminal history accumulates.
    pub fn pending_count(&self) -> Result<usize> {
        let [done, failed, quarantined] = terminal_state_params()?;
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE state NOT IN (?1, ?2, ?3)",
                params![done, failed, quarantined],
                |row| row.get(0),
            )
            .map_err(|e| CustodiaError::Database(format!("count pending: {e}")))?;
        Ok(count as usize)
    }
}

/// The stored (JSON) forms of the three terminal states, for SQL
/// predicates. Derived from the same serialization as the `state` column
/// so the two can never drift apart.
fn terminal_state_params() -> Result<[String; 3]> {
    Ok([
        serde_json::to_string(&JobState::Completed)?,
        serde_json::to_string(&JobState::Failed)?,
        serde_json::to_string(&JobState::Quarantined)?,
    ])
}

/// Map a SQLite row to a `TransferJob`.
///
/// Column indices must match the SELECT order used in the query methods.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransferJob> {
    let id_str: String = row.get(0)?;
    let artifact_digest: String = row.get(1)?;
    let wire_digest: String = row.get(2)?;
    let artifact_size: u64 = row.get::<_, i64>(3)? as u64;
    let hops_json: String = row.get(4)?;
    let current_hop: usize = row.get::<_, i64>(5)? as usize;
    let state_json: String = row.get(6)?;
    let counters_json: String = row.get(7)?;
    let error_message: Option<String> = row.get(8)?;
    let created_at_str: String = row.get(9)?;
    let updated_at_str: String = row.get(10)?;

    let uuid = uuid::Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let hop_sequence: Vec<String> = serde_json::from_str(&hops_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let state: JobState = serde_json::from_str(&state_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let attempt_counters: Vec<u32> = serde_json::from_str(&counters_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(TransferJob {
        id: JobId(uuid),
        artifact_digest,
        wire_digest,
        artifact_size,
        hop_sequence,
        current_hop,
        state,
        attempt_counters,
        error_message,
        created_at,
        updated_at,
    })
}
