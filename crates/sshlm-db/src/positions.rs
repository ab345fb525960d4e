//! Saved read offsets for tailed log files.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::MutexGuard;

pub struct Positions<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Positions<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    pub fn get(&self, path: &Path) -> Result<Option<u64>, rusqlite::Error> {
        let offset: Option<i64> = self
            .conn
            .query_row(
                "SELECT byte_offset FROM positions WHERE path = ?1",
                params![path.to_string_lossy().to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(offset.map(|o| o.max(0) as u64))
    }

    pub fn save(&self, path: &Path, offset: u64) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            INSERT INTO positions (path, byte_offset, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET
                byte_offset = excluded.byte_offset,
                updated_at = excluded.updated_at
            "#,
            params![
                path.to_string_lossy().to_string(),
                offset as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}
