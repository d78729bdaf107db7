//! # Stage: Participant Store
//!
//! ## Responsibility
//! Owns the single `participants` table. Every read and write the rest of the
//! crate performs goes through a [`Store`] handle.
//!
//! ## Guarantees
//! - Cloneable handle; all clones share one SQLite connection
//! - Every call runs on tokio's blocking pool, never on an executor thread
//! - Each call is its own unit of work; batches commit atomically or not at all
//! - `external_id` uniqueness is enforced by the schema and surfaced as
//!   [`DashboardError::Conflict`]
//!
//! ## NOT Responsible For
//! - Pagination bounds (that is the query service)
//! - Parsing documents (that is the loader)

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::{debug, info, trace};

use crate::error::{DashboardError, Result};
use crate::filter::{Dimension, ParticipantFilter};
use crate::models::{GroupCount, NewParticipant, Participant};

// ---------------------------------------------------------------------------
// SQL
// ---------------------------------------------------------------------------

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS participants (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT    NOT NULL UNIQUE,
    diagnosis   TEXT    NOT NULL,
    age         INTEGER NOT NULL,
    gender      TEXT    NOT NULL,
    state       TEXT    NOT NULL,
    joined_at   TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_participants_external_id ON participants (external_id);
";

const INSERT_SQL: &str = "INSERT INTO participants \
    (external_id, diagnosis, age, gender, state, joined_at) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const SELECT_COLUMNS: &str = "id, external_id, diagnosis, age, gender, state, joined_at";

/// How long a statement waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Shared handle to the participant table.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!(path = %path.display(), journal_mode = %mode, "opened participant store");
        Self::from_connection(conn)
    }

    /// A private in-memory database; used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| DashboardError::Unavailable("connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| DashboardError::Unavailable(format!("store task failed: {e}")))?
    }

    /// Create the table and index if they are missing. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.run(|conn| create_schema(conn)).await
    }

    /// Insert one participant and return it with its assigned id.
    pub async fn insert(&self, participant: NewParticipant) -> Result<Participant> {
        self.run(move |conn| {
            let id = insert_row(conn, &participant)?;
            Ok(participant.with_id(id))
        })
        .await
    }

    /// Insert a batch in one transaction. A duplicate aborts the whole batch.
    pub async fn insert_all(&self, batch: Vec<NewParticipant>) -> Result<usize> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for p in &batch {
                insert_row(&tx, p)?;
            }
            tx.commit()?;
            debug!(rows = batch.len(), "committed participant batch");
            Ok(batch.len())
        })
        .await
    }

    /// Delete every row and insert `batch`, committing both as one unit.
    pub async fn replace_all(&self, batch: Vec<NewParticipant>) -> Result<usize> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            trace!(sql = "DELETE FROM participants", "executing");
            let purged = tx.execute("DELETE FROM participants", [])?;
            for p in &batch {
                insert_row(&tx, p)?;
            }
            tx.commit()?;
            info!(purged, inserted = batch.len(), "replaced participant table");
            Ok(batch.len())
        })
        .await
    }

    /// Matching rows in primary-key order, `limit` rows starting at `offset`.
    pub async fn list(
        &self,
        filter: ParticipantFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Participant>> {
        self.run(move |conn| {
            let (clause, mut values) = filter.where_clause();
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM participants{clause} ORDER BY id ASC LIMIT ? OFFSET ?"
            );
            values.push(Value::Integer(i64::from(limit)));
            values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
            trace!(sql = %sql, "executing");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_participant)?;
            let participants = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(participants)
        })
        .await
    }

    /// Number of matching rows.
    pub async fn count(&self, filter: ParticipantFilter) -> Result<u64> {
        self.run(move |conn| {
            let (clause, values) = filter.where_clause();
            let sql = format!("SELECT COUNT(*) FROM participants{clause}");
            trace!(sql = %sql, "executing");

            let n: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
            Ok(n.max(0) as u64)
        })
        .await
    }

    /// Row counts per distinct value of `dim` among matching rows, ordered by
    /// the dimension's natural order (numeric for age).
    pub async fn group_counts(
        &self,
        dim: Dimension,
        filter: ParticipantFilter,
    ) -> Result<Vec<GroupCount>> {
        self.run(move |conn| {
            let column = dim.column();
            let (clause, values) = filter.where_clause();
            let sql = format!(
                "SELECT {column}, COUNT(*) FROM participants{clause} GROUP BY {column} ORDER BY {column} ASC"
            );
            trace!(sql = %sql, "executing");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), |row| {
                let label = match row.get::<_, Value>(0)? {
                    Value::Integer(n) => n.to_string(),
                    Value::Real(f) => f.to_string(),
                    Value::Text(s) => s,
                    Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
                    Value::Null => String::new(),
                };
                let value: i64 = row.get(1)?;
                Ok(GroupCount {
                    label,
                    value: value.max(0) as u64,
                })
            })?;
            let groups = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(groups)
        })
        .await
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

fn insert_row(conn: &Connection, p: &NewParticipant) -> Result<i64> {
    trace!(sql = INSERT_SQL, external_id = %p.external_id, "executing");
    conn.execute(
        INSERT_SQL,
        params![p.external_id, p.diagnosis, p.age, p.gender, p.state, p.joined_at],
    )
    .map_err(|e| DashboardError::from_insert(e, &p.external_id))?;
    Ok(conn.last_insert_rowid())
}

fn row_to_participant(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        external_id: row.get(1)?,
        diagnosis: row.get(2)?,
        age: row.get(3)?,
        gender: row.get(4)?,
        state: row.get(5)?,
        joined_at: row.get(6)?,
    })
}
