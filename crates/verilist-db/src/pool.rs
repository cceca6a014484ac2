//! The SQLite pool behind the ledger and checkpoint store.
//!
//! Ledger writes happen on blocking tasks while the status endpoint reads
//! counts, so every connection runs in WAL mode and waits on a busy database
//! instead of failing the sink that is being recorded.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Pool sizing and lock waiting, from the `[database]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 4,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open ledger database: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Applies the per-connection settings every ledger connection needs.
///
/// In-memory databases report journal mode `memory` and are accepted as is.
///
/// # Errors
///
/// Fails if SQLite refuses WAL mode for a file database.
pub fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("wal") && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("ledger database refused WAL mode, got {journal_mode}")),
        ));
    }
    conn.busy_timeout(busy_timeout)
}

/// Opens (creating if needed) the ledger database at `db_path`.
///
/// A `:memory:` path gives every pooled connection its own empty database,
/// so anything that shares ledger state across calls uses a file.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if no connection can be opened.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let busy_timeout = Duration::from_millis(settings.busy_timeout_ms);

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| configure_connection(conn, busy_timeout));

    Ok(Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?)
}
