use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Row of the hash-to-object index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub hash: String,
    pub name: String,
    pub size: u64,
    pub stored_at: chrono::DateTime<chrono::Utc>,
}

/// ObjectIndex maps content hashes to stored object names so dedup checks and
/// download lookups never rescan the object directory.
pub struct ObjectIndex {
    db_path: PathBuf,
}

impl ObjectIndex {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let index = Self { db_path };
        index.init_schema()?;
        Ok(index)
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS objects (
                hash TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                size INTEGER NOT NULL,
                stored_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub fn insert(&self, object: &StoredObject) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO objects (hash, name, size, stored_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                object.hash,
                object.name,
                object.size as i64,
                object.stored_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub fn get_by_hash(&self, hash: &str) -> Result<Option<StoredObject>> {
        self.query_one(
            "SELECT hash, name, size, stored_at FROM objects WHERE hash = ?1",
            hash,
        )
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<StoredObject>> {
        self.query_one(
            "SELECT hash, name, size, stored_at FROM objects WHERE name = ?1",
            name,
        )
    }

    pub fn remove(&self, hash: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM objects WHERE hash = ?1", [hash])?;
        Ok(affected > 0)
    }

    pub fn list(&self) -> Result<Vec<StoredObject>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT hash, name, size, stored_at FROM objects ORDER BY name")?;

        let rows = stmt.query_map([], row_to_object)?;

        let mut objects = Vec::new();
        for row in rows {
            objects.push(row?);
        }

        Ok(objects)
    }

    fn query_one(&self, sql: &str, key: &str) -> Result<Option<StoredObject>> {
        let conn = self.get_conn()?;
        let object = conn.query_row(sql, [key], row_to_object).optional()?;
        Ok(object)
    }
}

fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredObject> {
    let hash: String = row.get(0)?;
    let name: String = row.get(1)?;
    let size: i64 = row.get(2)?;
    let stored_at: String = row.get(3)?;

    Ok(StoredObject {
        hash,
        name,
        size: size as u64,
        stored_at: chrono::DateTime::parse_from_rfc3339(&stored_at)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?
            .with_timezone(&chrono::Utc),
    })
}
