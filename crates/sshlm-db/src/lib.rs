//! Database layer for sshlm.
//!
//! Provides a unified `Database` struct that owns the SQLite connection
//! and gives access to the fingerprint registry and saved tail positions.

mod fingerprints;
mod positions;

pub use fingerprints::{FingerprintRecord, Fingerprints};
pub use positions::Positions;

use rusqlite::Connection;
use sshlm_core::{FingerprintLookup, FingerprintRegistry, PositionStore, RegistryError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The main database struct that owns the SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the default location.
    ///
    /// The default location is `~/.local/share/sshlm/fingerprints.db`.
    pub fn open() -> Result<Self, rusqlite::Error> {
        let db_path = Self::default_path();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        Self::open_at(&db_path)
    }

    /// Open or create a database at a specific path.
    pub fn open_at(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get the default database path.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sshlm")
            .join("fingerprints.db")
    }

    /// Access the fingerprints store.
    pub fn fingerprints(&self) -> Fingerprints<'_> {
        let conn = self.conn.lock().expect("Database lock poisoned");
        Fingerprints::new(conn)
    }

    /// Access the tail positions store.
    pub fn positions(&self) -> Positions<'_> {
        let conn = self.conn.lock().expect("Database lock poisoned");
        Positions::new(conn)
    }

    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fingerprints (
                fingerprint TEXT PRIMARY KEY,
                key_user TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fingerprints_key_user ON fingerprints(key_user);

            CREATE TABLE IF NOT EXISTS positions (
                path TEXT PRIMARY KEY,
                byte_offset INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
    }
}

impl FingerprintLookup for Database {
    fn lookup(&self, fingerprint: &str) -> Result<Option<String>, RegistryError> {
        self.fingerprints()
            .get(fingerprint)
            .map_err(RegistryError::backend)
    }
}

impl FingerprintRegistry for Database {
    fn store(&self, fingerprint: &str, key_user: &str) -> Result<(), RegistryError> {
        self.fingerprints()
            .put(fingerprint, key_user)
            .map_err(RegistryError::backend)
    }
}

impl PositionStore for Database {
    fn load_position(&self, path: &Path) -> Result<Option<u64>, RegistryError> {
        self.positions().get(path).map_err(RegistryError::backend)
    }

    fn save_position(&self, path: &Path, offset: u64) -> Result<(), RegistryError> {
        self.positions()
            .save(path, offset)
            .map_err(RegistryError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshlm_core::{collect_keys, parse_line_in_year};
    use std::io::Write;

    #[test]
    fn test_put_and_get() {
        let db = Database::open_in_memory().unwrap();

        db.fingerprints().put("SHA256:abc123", "alice").unwrap();

        assert_eq!(
            db.fingerprints().get("abc123").unwrap(),
            Some("alice".to_string())
        );
        assert_eq!(db.fingerprints().get("missing").unwrap(), None);
    }

    #[test]
    fn test_put_last_write_wins() {
        let db = Database::open_in_memory().unwrap();

        db.fingerprints().put("abc123", "alice").unwrap();
        db.fingerprints().put("abc123", "bob").unwrap();

        assert_eq!(
            db.fingerprints().get("abc123").unwrap(),
            Some("bob".to_string())
        );
        assert_eq!(db.fingerprints().list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_ordered_by_key_user() {
        let db = Database::open_in_memory().unwrap();

        db.fingerprints().put("fp-b", "bob").unwrap();
        db.fingerprints().put("SHA256:fp-a", "alice").unwrap();

        let records = db.fingerprints().list().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key_user, "alice");
        assert_eq!(records[0].fingerprint, "fp-a");
        assert_eq!(records[1].key_user, "bob");
    }

    #[test]
    fn test_positions() {
        let db = Database::open_in_memory().unwrap();
        let path = Path::new("/var/log/secure");

        assert_eq!(db.positions().get(path).unwrap(), None);

        db.positions().save(path, 1024).unwrap();
        db.positions().save(path, 2048).unwrap();

        assert_eq!(db.positions().get(path).unwrap(), Some(2048));
    }

    #[test]
    fn test_registry_traits() {
        let db = Database::open_in_memory().unwrap();

        db.store("abc123", "alice").unwrap();
        assert!(db.contains("abc123").unwrap());

        let line = "Apr 27 10:21:19 host sshd[1]: Accepted publickey for root from 192.168.1.24 port 49090 ssh2: ED25519 SHA256:abc123";
        let event = parse_line_in_year(line, &db, 2024).unwrap().unwrap();
        assert_eq!(event.key_user, "alice");
    }

    #[test]
    fn test_collect_keys_into_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let keys = dir.path().join("authorized_keys");
        let mut file = std::fs::File::create(&keys).unwrap();
        writeln!(
            file,
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEB alice@laptop"
        )
        .unwrap();
        drop(file);

        let db = Database::open_at(&dir.path().join("fingerprints.db")).unwrap();
        let written = collect_keys(&[keys], &db, false).unwrap();

        assert_eq!(written, 1);
        assert_eq!(
            db.lookup("RXm/ruZ0eTzRXKwi1AQEDynB0VgHQ2ac9KPSFdf/YnA").unwrap(),
            Some("alice@laptop".to_string())
        );
    }
}
