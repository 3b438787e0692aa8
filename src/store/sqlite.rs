// ABOUTME: SQLite target store for local rehearsal runs
// ABOUTME: Validates the target path and opens an existing database read-write

use super::{ConnectOptions, TargetStore, TextRow};
use crate::error::{ConnectionError, StoreError};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// File extensions accepted for SQLite targets
pub const SQLITE_EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3"];

/// Virtual machine steps between deadline checks
const DEADLINE_CHECK_OPS: i32 = 1000;

/// Validate a SQLite target path
///
/// The target must already exist: its schema comes from the application's
/// own migrations, so a typo must not silently create an empty database.
///
/// Security checks:
/// - Canonicalizes path to resolve symlinks and relative paths
/// - Verifies the file exists and is a regular file
/// - Checks the extension is .db, .sqlite, or .sqlite3
///
/// # Examples
///
/// ```no_run
/// # use dump_migrate::store::sqlite::validate_target_path;
/// # use std::path::Path;
/// assert!(validate_target_path(Path::new("rehearsal.db")).is_ok());
/// assert!(validate_target_path(Path::new("../../../etc/passwd")).is_err());
/// ```
pub fn validate_target_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        bail!("SQLite target path cannot be empty");
    }

    let canonical = path.canonicalize().with_context(|| {
        format!(
            "Failed to resolve SQLite target '{}'. \
             File may not exist or may not be readable.",
            path.display()
        )
    })?;

    if !canonical.is_file() {
        bail!(
            "Path '{}' is not a regular file (may be a directory)",
            path.display()
        );
    }

    let ext = canonical
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !SQLITE_EXTENSIONS.contains(&ext.as_str()) {
        bail!(
            "Invalid SQLite target '{}'. Must end in .db, .sqlite, or .sqlite3",
            path.display()
        );
    }

    tracing::debug!("Validated SQLite target: {}", canonical.display());
    Ok(canonical)
}

fn rejection(err: rusqlite::Error) -> StoreError {
    StoreError::Rejected(err.to_string())
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted
    )
}

fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Some(format!("<{} bytes>", bytes.len())),
    }
}

/// SQLite target
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
    statement_timeout: Duration,
}

impl SqliteStore {
    /// Open an existing SQLite database for writing
    ///
    /// The statement timeout bounds every statement and query, and doubles as
    /// the busy timeout for lock waits. A zero timeout disables both.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the path fails validation or the
    /// database cannot be opened or queried.
    pub fn open(path: &Path, options: &ConnectOptions) -> Result<Self, ConnectionError> {
        let fail = |message: String| ConnectionError {
            target: format!("sqlite://{}", path.display()),
            message,
        };

        let canonical = validate_target_path(path).map_err(|e| fail(format!("{:#}", e)))?;

        tracing::info!("Opening SQLite target: {}", canonical.display());

        let conn = Connection::open_with_flags(&canonical, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|e| fail(format!("Failed to open SQLite database: {}", e)))?;

        Self::from_connection(conn, canonical, options).map_err(fail)
    }

    /// Wrap an already opened connection
    pub fn from_connection(
        conn: Connection,
        path: PathBuf,
        options: &ConnectOptions,
    ) -> Result<Self, String> {
        conn.busy_timeout(options.statement_timeout)
            .map_err(|e| format!("Failed to set busy timeout: {}", e))?;

        let _version: String = conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .map_err(|e| format!("Failed to query SQLite version (database may be corrupted): {}", e))?;

        Ok(Self {
            conn,
            path,
            statement_timeout: options.statement_timeout,
        })
    }

    /// Run `work` with SQLite interrupting it once the statement timeout passes
    ///
    /// Calls are synchronous, so an async timeout around them cannot fire
    /// until they return; the progress handler stops them from inside.
    fn with_deadline<T>(
        &self,
        work: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let timeout = self.statement_timeout;
        if !timeout.is_zero() {
            let deadline = Instant::now() + timeout;
            self.conn
                .progress_handler(DEADLINE_CHECK_OPS, Some(move || Instant::now() >= deadline));
        }

        let result = work(&self.conn);

        if !timeout.is_zero() {
            self.conn
                .progress_handler(DEADLINE_CHECK_OPS, None::<fn() -> bool>);
        }

        result.map_err(|e| {
            if is_interrupt(&e) {
                tracing::debug!("SQLite interrupted a statement after {:?}", timeout);
                StoreError::Timeout(timeout)
            } else {
                rejection(e)
            }
        })
    }
}

#[async_trait]
impl TargetStore for SqliteStore {
    fn describe(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    async fn server_version(&mut self) -> Result<String, StoreError> {
        let version: String = self
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .map_err(rejection)?;
        Ok(format!("SQLite {}", version))
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, StoreError> {
        let changed = self.with_deadline(|conn| conn.execute(sql, []))?;
        Ok(changed as u64)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<TextRow>, StoreError> {
        self.with_deadline(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();

            let rows = stmt.query_map([], |row| {
                let mut fields = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    fields.push((name.clone(), value_to_text(row.get_ref(i)?)));
                }
                Ok(TextRow::new(fields))
            })?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    async fn list_tables(&mut self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .map_err(rejection)?;

        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(rejection)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(rejection)?;

        Ok(tables)
    }
}
