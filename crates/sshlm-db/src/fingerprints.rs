//! Fingerprint registry store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sshlm_core::normalize_fingerprint;
use std::sync::MutexGuard;

/// A stored fingerprint → key user mapping.
#[derive(Debug, Clone)]
pub struct FingerprintRecord {
    pub fingerprint: String,
    pub key_user: String,
    pub updated_at: DateTime<Utc>,
}

/// Fingerprints store with a borrowed connection.
pub struct Fingerprints<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Fingerprints<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Insert or replace the key user for a fingerprint.
    pub fn put(&self, fingerprint: &str, key_user: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            INSERT INTO fingerprints (fingerprint, key_user, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(fingerprint) DO UPDATE SET
                key_user = excluded.key_user,
                updated_at = excluded.updated_at
            "#,
            params![
                normalize_fingerprint(fingerprint),
                key_user,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Get the key user for a fingerprint.
    pub fn get(&self, fingerprint: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT key_user FROM fingerprints WHERE fingerprint = ?1",
                params![normalize_fingerprint(fingerprint)],
                |row| row.get(0),
            )
            .optional()
    }

    /// List all mappings ordered by key user.
    pub fn list(&self) -> Result<Vec<FingerprintRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, key_user, updated_at FROM fingerprints ORDER BY key_user, fingerprint",
        )?;
        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<FingerprintRecord, rusqlite::Error> {
        let updated_at: String = row.get(2)?;
        Ok(FingerprintRecord {
            fingerprint: row.get(0)?,
            key_user: row.get(1)?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
