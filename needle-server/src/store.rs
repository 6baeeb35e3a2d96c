//! SQLite certificate cache

use needle_core::{CertificateRecord, CertificateStore, StoreError};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Certificate store backed by a single SQLite file.
///
/// One connection, serialized by a mutex. Same-name writes are already
/// serialized by the issuance service.
pub struct SqliteCertificateStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteCertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCertificateStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteCertificateStore {
    /// Open (or create) the database file. Call [`init`](Self::init) before use.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create db parent: {e}")))?;
        }

        let conn = Connection::open(&path).map_err(sqlite_err)?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(sqlite_err)?;
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )
        .map_err(sqlite_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(sqlite_err)?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing, initialized database for reading. Nothing is created.
    pub fn open_read_only(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.is_file() {
            return Err(StoreError::Backend(format!(
                "database file not found: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(sqlite_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(sqlite_err)?;

        let version: i32 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(sqlite_err)?;
        match version {
            CURRENT_SCHEMA_VERSION => {}
            0 => {
                return Err(StoreError::InvalidData(format!(
                    "{} is not an initialized certificate cache",
                    path.display()
                )));
            }
            found => {
                return Err(StoreError::InvalidData(format!(
                    "unsupported schema version: {found}"
                )));
            }
        }

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let version: i32 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(sqlite_err)?;

        match version {
            0 => {
                conn.execute_batch(&format!(
                    "BEGIN IMMEDIATE;
                     CREATE TABLE IF NOT EXISTS certificates (
                        name TEXT PRIMARY KEY,
                        cert_pem BLOB NOT NULL,
                        key_pem BLOB NOT NULL,
                        created_at INTEGER NOT NULL
                     );
                     PRAGMA user_version = {CURRENT_SCHEMA_VERSION};
                     COMMIT;"
                ))
                .map_err(|e| {
                    let _ = conn.execute_batch("ROLLBACK;");
                    sqlite_err(e)
                })?;
                tracing::debug!(path = %self.path.display(), "Created certificate cache schema");
            }
            CURRENT_SCHEMA_VERSION => {}
            found => {
                return Err(StoreError::InvalidData(format!(
                    "unsupported schema version: {found}"
                )));
            }
        }

        Ok(())
    }

    /// All cached records, ordered by name.
    pub fn list(&self) -> Result<Vec<CertificateRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT name, cert_pem, key_pem, created_at
                 FROM certificates ORDER BY name;",
            )
            .map_err(sqlite_err)?;
        let rows = stmt.query_map([], row_to_record).map_err(sqlite_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(validate(row.map_err(sqlite_err)?)?);
        }
        Ok(records)
    }
}

impl CertificateStore for SqliteCertificateStore {
    fn get(&self, name: &str) -> Result<CertificateRecord, StoreError> {
        let record = self
            .conn
            .lock()
            .query_row(
                "SELECT name, cert_pem, key_pem, created_at
                 FROM certificates WHERE name = ?1;",
                params![name],
                row_to_record,
            )
            .optional()
            .map_err(sqlite_err)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        validate(record)
    }

    fn put(&self, record: &CertificateRecord) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO certificates (name, cert_pem, key_pem, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    cert_pem = excluded.cert_pem,
                    key_pem = excluded.key_pem,
                    created_at = excluded.created_at;",
                params![record.name, record.cert_pem, record.key_pem, record.created_at],
            )
            .map_err(sqlite_err)?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CertificateRecord> {
    Ok(CertificateRecord {
        name: row.get(0)?,
        cert_pem: row.get(1)?,
        key_pem: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn validate(record: CertificateRecord) -> Result<CertificateRecord, StoreError> {
    if record.cert_pem.is_empty() || record.key_pem.is_empty() {
        return Err(StoreError::InvalidData(format!(
            "empty certificate material for '{}'",
            record.name
        )));
    }
    Ok(record)
}

fn sqlite_err(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}
