use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::StoreError;

use super::schema;
use super::{CoordinationSnapshot, SnapshotStore};

/// SQLite-backed implementation of [`SnapshotStore`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn();

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::Sqlite)?;
        // Ignored for in-memory databases.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM tandem_meta WHERE key = ?1",
                params![schema::META_SCHEMA_VERSION],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        match stored {
            None => {
                conn.execute(
                    "INSERT INTO tandem_meta (key, value) VALUES (?1, ?2)",
                    params![schema::META_SCHEMA_VERSION, schema::SCHEMA_VERSION],
                )
                .map_err(StoreError::Sqlite)?;
            }
            Some(version) if version != schema::SCHEMA_VERSION => {
                return Err(StoreError::Migration(format!(
                    "database schema version {version} is not supported (expected {})",
                    schema::SCHEMA_VERSION
                ))
                .into());
            }
            Some(_) => {}
        }
        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_str(json)?)
}

fn signature_key(pattern: &crate::learn::Pattern) -> String {
    pattern
        .signature
        .iter()
        .map(tandem_dag::OperationKind::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn load_records<T: DeserializeOwned>(conn: &Connection, sql: &str) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut records = Vec::new();
    for row in rows {
        records.push(from_json(&row?)?);
    }
    Ok(records)
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT value FROM tandem_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO tandem_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn parse_counter<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<T, StoreError>
where
    T: Default,
{
    match value {
        None => Ok(T::default()),
        Some(v) => v
            .parse()
            .map_err(|_| StoreError::Migration(format!("corrupt meta value for {key}: {v:?}"))),
    }
}

#[async_trait::async_trait]
impl SnapshotStore for SqliteStore {
    async fn save_snapshot(&self, snapshot: &CoordinationSnapshot) -> crate::error::Result<()> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;

        // A save that lost a race must not overwrite newer state.
        if let (Some(incoming), Some(stored)) =
            (snapshot.saved_at, read_meta(&tx, schema::META_SAVED_AT)?)
        {
            let stored = DateTime::parse_from_rfc3339(&stored)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StoreError::Migration(format!("corrupt saved_at: {e}")))?;
            if stored > incoming {
                debug!(%stored, %incoming, "Skipping snapshot older than the stored one");
                return Ok(());
            }
        }

        for table in schema::DATA_TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .map_err(StoreError::Sqlite)?;
        }

        {
            let mut stmt = tx
                .prepare_cached("INSERT INTO vertices (id, record) VALUES (?1, ?2)")
                .map_err(StoreError::Sqlite)?;
            for vertex in &snapshot.vertices {
                stmt.execute(params![vertex.id.0, to_json(vertex)?])
                    .map_err(StoreError::Sqlite)?;
            }
        }
        {
            let mut stmt = tx
                .prepare_cached("INSERT INTO agents (agent_id, record) VALUES (?1, ?2)")
                .map_err(StoreError::Sqlite)?;
            for agent in &snapshot.agents {
                stmt.execute(params![agent.agent_id, to_json(agent)?])
                    .map_err(StoreError::Sqlite)?;
            }
        }
        {
            let mut stmt = tx
                .prepare_cached("INSERT INTO journal (seq, record) VALUES (?1, ?2)")
                .map_err(StoreError::Sqlite)?;
            for entry in &snapshot.journal {
                let seq = i64::try_from(entry.seq)
                    .map_err(|_| StoreError::Migration(format!("journal seq {} overflows", entry.seq)))?;
                stmt.execute(params![seq, to_json(entry)?])
                    .map_err(StoreError::Sqlite)?;
            }
        }
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO trajectories (id, position, is_open, record)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(StoreError::Sqlite)?;
            let closed = snapshot.trajectories.iter().map(|t| (t, false));
            let open = snapshot.open_trajectory.iter().map(|t| (t, true));
            for (position, (trajectory, is_open)) in closed.chain(open).enumerate() {
                let position = i64::try_from(position).unwrap_or(i64::MAX);
                stmt.execute(params![
                    trajectory.id.to_string(),
                    position,
                    is_open,
                    to_json(trajectory)?
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }
        {
            let mut stmt = tx
                .prepare_cached("INSERT INTO patterns (signature, record) VALUES (?1, ?2)")
                .map_err(StoreError::Sqlite)?;
            for pattern in &snapshot.patterns {
                stmt.execute(params![signature_key(pattern), to_json(pattern)?])
                    .map_err(StoreError::Sqlite)?;
            }
        }

        let saved_at = snapshot.saved_at.unwrap_or_else(Utc::now);
        write_meta(&tx, schema::META_NEXT_VERTEX_ID, &snapshot.next_vertex_id.to_string())?;
        write_meta(&tx, schema::META_JOURNAL_HEAD, &snapshot.journal_head.to_string())?;
        write_meta(&tx, schema::META_SAVED_AT, &saved_at.to_rfc3339())?;

        tx.commit().map_err(StoreError::Sqlite)?;
        debug!(
            vertices = snapshot.vertices.len(),
            trajectories = snapshot.trajectories.len(),
            patterns = snapshot.patterns.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    async fn load_snapshot(&self) -> crate::error::Result<Option<CoordinationSnapshot>> {
        let conn = self.conn();
        let Some(saved_at) = read_meta(&conn, schema::META_SAVED_AT)? else {
            return Ok(None);
        };
        let saved_at = DateTime::parse_from_rfc3339(&saved_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Migration(format!("corrupt saved_at: {e}")))?;

        let vertices = load_records(&conn, "SELECT record FROM vertices ORDER BY id")?;
        let agents = load_records(&conn, "SELECT record FROM agents ORDER BY agent_id")?;
        let journal = load_records(&conn, "SELECT record FROM journal ORDER BY seq")?;
        let trajectories: Vec<crate::learn::Trajectory> = load_records(
            &conn,
            "SELECT record FROM trajectories WHERE is_open = 0 ORDER BY position",
        )?;
        let open_trajectory = load_records::<crate::learn::Trajectory>(
            &conn,
            "SELECT record FROM trajectories WHERE is_open = 1 ORDER BY position",
        )?
        .into_iter()
        .next();
        let patterns = load_records(&conn, "SELECT record FROM patterns ORDER BY signature")?;

        let next_vertex_id = parse_counter(
            schema::META_NEXT_VERTEX_ID,
            read_meta(&conn, schema::META_NEXT_VERTEX_ID)?,
        )?;
        let journal_head = parse_counter(
            schema::META_JOURNAL_HEAD,
            read_meta(&conn, schema::META_JOURNAL_HEAD)?,
        )?;

        Ok(Some(CoordinationSnapshot {
            vertices,
            next_vertex_id,
            agents,
            journal,
            journal_head,
            open_trajectory,
            trajectories,
            patterns,
            saved_at: Some(saved_at),
        }))
    }

    async fn clear(&self) -> crate::error::Result<()> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;
        for table in schema::DATA_TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .map_err(StoreError::Sqlite)?;
        }
        tx.execute(
            "DELETE FROM tandem_meta WHERE key <> ?1",
            params![schema::META_SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;
        tx.commit().map_err(StoreError::Sqlite)?;
        info!("Snapshot store cleared");
        Ok(())
    }
}
