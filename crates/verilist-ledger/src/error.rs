//! Error types for the ledger layer.

use verilist_types::EffectKey;

/// Errors that can occur during ledger and checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The effect key already has a row.
    #[error("effect already recorded: {} / {} / {}", .0.subject_id, .0.verifier_id, .0.sink)]
    Conflict(EffectKey),

    /// A database operation failed.
    #[error("ledger database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection could be obtained.
    #[error("ledger connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A stored value could not be decoded.
    #[error("ledger row is malformed: {0}")]
    InvalidRow(String),

    /// The blocking task running the query panicked or was cancelled.
    #[error("ledger task failed: {0}")]
    Task(String),
}

impl LedgerError {
    /// Returns true when the error means the effect is already recorded.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
