// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Database module: the Family → Control → CCI → STIG → STIGCheck →
//! Asset → CKLCheck data layer over SQLite.

mod assets;
mod catalog;
mod schema;
mod stigs;

pub use assets::AssetSummary;
pub use schema::LATEST_VERSION;

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

use crate::{Result, StigqterError};

/// Database manager for STIGQter (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    batch: Arc<BatchGate>,
}

/// The thread running a delayed-commit batch, shared by every clone.
///
/// While a batch is open, callers on other threads wait in `lock_conn`
/// until it has committed or rolled back.
#[derive(Default)]
struct BatchGate {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl BatchGate {
    /// Wait until no other thread owns a batch
    fn wait_turn(&self) -> Result<MutexGuard<'_, Option<ThreadId>>> {
        let me = thread::current().id();
        let owner = self.owner.lock().map_err(|_| poisoned("Batch"))?;
        self.released
            .wait_while(owner, |owner| owner.is_some_and(|id| id != me))
            .map_err(|_| poisoned("Batch"))
    }

    fn release(&self) {
        match self.owner.lock() {
            Ok(mut owner) => *owner = None,
            Err(e) => *e.into_inner() = None,
        }
        self.released.notify_all();
    }
}

/// Ends the outermost batch of a thread, even when its closure panics
struct BatchTurn<'a> {
    db: &'a Database,
}

impl Drop for BatchTurn<'_> {
    fn drop(&mut self) {
        if let Ok(conn) = self.db.conn.lock() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK; PRAGMA synchronous = FULL;") {
                    warn!("Rollback of abandoned batch failed: {}", e);
                }
            }
        }
        self.db.batch.release();
    }
}

fn poisoned(what: &str) -> StigqterError {
    StigqterError::Poisoned(what.to_string())
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStats {
    pub families: i64,
    pub controls: i64,
    pub ccis: i64,
    pub stigs: i64,
    pub stig_checks: i64,
    pub assets: i64,
    pub ckl_checks: i64,
}

impl Database {
    /// Open or create the database, upgrading its schema to the latest version
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Creating new database at {:?}", path);
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            batch: Arc::new(BatchGate::default()),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Lock the shared connection, first waiting out any batch that
    /// another thread has open
    pub(crate) fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        let _turn = self.batch.wait_turn()?;
        self.conn.lock().map_err(|_| poisoned("Database"))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::migrate(&conn)?;
        Ok(())
    }

    /// Current schema version recorded in the `variables` table
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        schema::current_version(&conn)
    }

    /// Drop every table and rebuild an empty database
    pub fn reset(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        schema::drop_all(&conn)?;
        schema::migrate(&conn)?;
        Ok(())
    }

    /// Run `f` as one delayed-commit batch.
    ///
    /// The writes issued by `f` are buffered in a single transaction with
    /// `synchronous = OFF` and committed when it returns `Ok`; an `Err`
    /// rolls the whole batch back. A batch started inside another batch on
    /// the same thread joins the outer transaction. Every other caller,
    /// through any clone of this handle, blocks until the batch ends, so
    /// their writes are never swept into it.
    pub fn bulk<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        {
            let mut owner = self.batch.wait_turn()?;
            if owner.is_some() {
                drop(owner);
                return f(self);
            }
            *owner = Some(thread::current().id());
        }
        let _turn = BatchTurn { db: self };

        self.lock_conn()?.execute_batch("PRAGMA synchronous = OFF; BEGIN;")?;
        let result = f(self);
        let conn = self.lock_conn()?;
        match result {
            Ok(value) => {
                conn.execute_batch("COMMIT; PRAGMA synchronous = FULL;")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK; PRAGMA synchronous = FULL;") {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Read a value from the `variables` table
    pub fn get_variable(&self, name: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM variables WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace a value in the `variables` table
    pub fn update_variable(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        schema::set_variable(&conn, name, value)
    }

    /// Remove a value from the `variables` table
    pub fn delete_variable(&self, name: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM variables WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.lock_conn()?;
        let count = |table: &str| -> Result<i64> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            Ok(conn.query_row(&sql, [], |row| row.get(0))?)
        };
        Ok(DbStats {
            families: count("Family")?,
            controls: count("Control")?,
            ccis: count("CCI")?,
            stigs: count("STIG")?,
            stig_checks: count("STIGCheck")?,
            assets: count("Asset")?,
            ckl_checks: count("CKLCheck")?,
        })
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

/// Turn a UNIQUE violation into `AlreadyExists`
fn map_constraint(err: rusqlite::Error, what: impl Into<String>) -> StigqterError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
            StigqterError::AlreadyExists(what.into())
        }
        other => other.into(),
    }
}

/// "s" for counts other than one
pub(crate) fn pluralize(count: usize, plural: &str, singular: &str) -> String {
    if count == 1 { singular.to_string() } else { plural.to_string() }
}
