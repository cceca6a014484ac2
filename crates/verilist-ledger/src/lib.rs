//! Durable local state: the idempotency ledger, the verification audit log
//! and the stream checkpoint.
//!
//! The synchronous functions in [`store`] operate on a borrowed
//! `rusqlite::Connection` and are what the tests exercise directly. The async
//! [`Ledger`] and [`CheckpointStore`] handles wrap a [`DbPool`] and run those
//! functions on the blocking thread pool so the event loop never blocks on
//! SQLite.
//!
//! A row in `effect_records` is proof that an effect was performed. Inserting
//! a second row for the same `(subject, verifier, sink)` key fails with
//! [`LedgerError::Conflict`], which callers treat as "already done".
//!
//! [`DbPool`]: verilist_db::DbPool

mod error;
mod handle;
pub mod store;

pub use error::LedgerError;
pub use handle::{CheckpointStore, Ledger, LedgerCounts};
