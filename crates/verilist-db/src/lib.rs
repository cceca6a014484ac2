//! Database layer for verilist.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. The ledger, checkpoint and verification
//! tables are all created through the versioned migrations in this crate.
//!
//! Exactly one process owns the database. Migrations are compiled in via
//! `include_str!`.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{configure_connection, create_pool, DbPool, DbRuntimeSettings, PoolError};
