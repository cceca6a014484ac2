//! Async handles over the pooled SQLite store.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use verilist_db::DbPool;
use verilist_types::{EffectKey, EffectRecord, SinkId};

use crate::error::LedgerError;
use crate::store;

async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, LedgerError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, LedgerError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn)
    })
    .await
    .map_err(|e| LedgerError::Task(e.to_string()))?
}

/// Row counts shown by the status endpoint and after a backfill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub effects: i64,
    pub verifications: i64,
}

/// The idempotency ledger.
///
/// Only the consuming process writes to it; concurrent producers are
/// detected through the link index, never through shared writes here.
#[derive(Clone)]
pub struct Ledger {
    pool: DbPool,
}

impl Ledger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Returns true if the effect is already recorded.
    pub async fn has_effect(&self, key: &EffectKey) -> Result<bool, LedgerError> {
        let key = key.clone();
        with_conn(&self.pool, move |conn| store::has_effect(conn, &key)).await
    }

    /// Records a performed effect. Fails with `Conflict` if the key exists.
    pub async fn record_effect(&self, record: EffectRecord) -> Result<(), LedgerError> {
        with_conn(&self.pool, move |conn| store::record_effect(conn, &record)).await
    }

    /// Returns every effect recorded for a subject.
    pub async fn effects_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Vec<EffectRecord>, LedgerError> {
        let subject_id = subject_id.to_string();
        with_conn(&self.pool, move |conn| {
            store::effects_for_subject(conn, &subject_id)
        })
        .await
    }

    /// Sinks recorded for a subject, whichever verifier caused them.
    pub async fn sinks_for_subject(&self, subject_id: &str) -> Result<Vec<SinkId>, LedgerError> {
        let subject_id = subject_id.to_string();
        with_conn(&self.pool, move |conn| store::sinks_for_subject(conn, &subject_id)).await
    }

    /// Adds a verification fact to the audit log.
    pub async fn record_verification(
        &self,
        subject_id: &str,
        verifier_id: &str,
        verified_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let subject_id = subject_id.to_string();
        let verifier_id = verifier_id.to_string();
        with_conn(&self.pool, move |conn| {
            store::record_verification(conn, &subject_id, &verifier_id, verified_at)
        })
        .await
    }

    pub async fn counts(&self) -> Result<LedgerCounts, LedgerError> {
        with_conn(&self.pool, |conn| {
            Ok(LedgerCounts {
                effects: store::count_effects(conn)?,
                verifications: store::count_verifications(conn)?,
            })
        })
        .await
    }
}

/// The durable resume cursor of one named stream.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: DbPool,
    stream: String,
}

impl CheckpointStore {
    pub fn new(pool: DbPool, stream: impl Into<String>) -> Self {
        Self {
            pool,
            stream: stream.into(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Reads the last fully processed position.
    pub async fn load(&self) -> Result<Option<i64>, LedgerError> {
        let stream = self.stream.clone();
        with_conn(&self.pool, move |conn| store::load_checkpoint(conn, &stream)).await
    }

    /// Persists `position`; never moves the checkpoint backwards.
    pub async fn save(&self, position: i64) -> Result<i64, LedgerError> {
        let stream = self.stream.clone();
        with_conn(&self.pool, move |conn| {
            store::save_checkpoint(conn, &stream, position)
        })
        .await
    }
}
