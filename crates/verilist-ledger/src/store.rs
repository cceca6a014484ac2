//! Persistence operations for effects, verifications and checkpoints.
//!
//! Timestamps are stored as RFC 3339 strings in UTC with millisecond
//! precision so they sort lexically.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use verilist_types::{EffectKey, EffectRecord, SinkId};

use crate::error::LedgerError;

fn to_sql_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_sql_time(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| LedgerError::InvalidRow(format!("bad timestamp {raw:?}: {e}")))
}

/// Returns true if an effect with this key has been recorded.
///
/// # Errors
///
/// Returns `LedgerError::Database` on SQL failure.
pub fn has_effect(conn: &Connection, key: &EffectKey) -> Result<bool, LedgerError> {
    let exists = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM effect_records
            WHERE subject_did = ?1 AND verifier_did = ?2 AND sink_id = ?3
         )",
        params![key.subject_id, key.verifier_id, key.sink.as_key()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Inserts an effect record.
///
/// # Errors
///
/// Returns `LedgerError::Conflict` when the key already has a row, or
/// `LedgerError::Database` on any other SQL failure.
pub fn record_effect(conn: &Connection, record: &EffectRecord) -> Result<(), LedgerError> {
    let result = conn.execute(
        "INSERT INTO effect_records
            (subject_did, verifier_did, sink_id, external_ref, performed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.key.subject_id,
            record.key.verifier_id,
            record.key.sink.as_key(),
            record.external_ref,
            to_sql_time(record.performed_at),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
            Err(LedgerError::Conflict(record.key.clone()))
        }
        Err(e) => Err(LedgerError::Database(e)),
    }
}

/// Returns every effect recorded for a subject, oldest first.
///
/// # Errors
///
/// Returns `LedgerError::Database` on SQL failure or
/// `LedgerError::InvalidRow` if a stored row cannot be decoded.
pub fn effects_for_subject(
    conn: &Connection,
    subject_id: &str,
) -> Result<Vec<EffectRecord>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT subject_did, verifier_did, sink_id, external_ref, performed_at
         FROM effect_records
         WHERE subject_did = ?1
         ORDER BY performed_at ASC, sink_id ASC",
    )?;
    let rows = stmt.query_map([subject_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (subject_id, verifier_id, sink, external_ref, performed_at) = row?;
        let sink: SinkId = sink
            .parse()
            .map_err(|e| LedgerError::InvalidRow(format!("{e}")))?;
        records.push(EffectRecord {
            key: EffectKey {
                subject_id,
                verifier_id,
                sink,
            },
            external_ref,
            performed_at: from_sql_time(&performed_at)?,
        });
    }
    Ok(records)
}

/// Returns the distinct sinks recorded for a subject under any verifier.
///
/// # Errors
///
/// Returns `LedgerError::Database` on SQL failure or
/// `LedgerError::InvalidRow` if a stored sink id cannot be parsed.
pub fn sinks_for_subject(conn: &Connection, subject_id: &str) -> Result<Vec<SinkId>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT sink_id FROM effect_records WHERE subject_did = ?1 ORDER BY sink_id",
    )?;
    let rows = stmt.query_map([subject_id], |row| row.get::<_, String>(0))?;

    let mut sinks = Vec::new();
    for row in rows {
        let sink: SinkId = row?
            .parse()
            .map_err(|e| LedgerError::InvalidRow(format!("{e}")))?;
        sinks.push(sink);
    }
    Ok(sinks)
}

/// Counts all recorded effects.
///
/// # Errors
///
/// Returns `LedgerError::Database` on SQL failure.
pub fn count_effects(conn: &Connection) -> Result<i64, LedgerError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM effect_records", [], |row| row.get(0))?)
}

/// Records that `verifier_id` verified `subject_id`.
///
/// Returns `true` if this is the first time the pair was seen. Re-observing
/// a pair keeps the original `verified_at`.
///
/// # Errors
///
/// Returns `LedgerError::Database` on SQL failure.
pub fn record_verification(
    conn: &Connection,
    subject_id: &str,
    verifier_id: &str,
    verified_at: DateTime<Utc>,
) -> Result<bool, LedgerError> {
    let inserted = conn.execute(
        "INSERT INTO verifications (subject_did, verifier_did, verified_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(subject_did, verifier_did) DO NOTHING",
        params![subject_id, verifier_id, to_sql_time(verified_at)],
    )?;
    Ok(inserted > 0)
}

/// Counts recorded verification facts.
///
/// # Errors
///
/// Returns `LedgerError::Database` on SQL failure.
pub fn count_verifications(conn: &Connection) -> Result<i64, LedgerError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM verifications", [], |row| row.get(0))?)
}

/// Reads the checkpoint of a named stream.
///
/// # Errors
///
/// Returns `LedgerError::Database` on SQL failure.
pub fn load_checkpoint(conn: &Connection, stream: &str) -> Result<Option<i64>, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT position FROM checkpoints WHERE stream = ?1",
            [stream],
            |row| row.get(0),
        )
        .optional()?)
}

/// Advances the checkpoint of a named stream.
///
/// The stored value never decreases: saving an older position leaves the
/// newer one in place. Returns the position now stored.
///
/// # Errors
///
/// Returns `LedgerError::Database` on SQL failure.
pub fn save_checkpoint(conn: &Connection, stream: &str, position: i64) -> Result<i64, LedgerError> {
    let stored = conn.query_row(
        "INSERT INTO checkpoints (stream, position) VALUES (?1, ?2)
         ON CONFLICT(stream) DO UPDATE SET
            position = MAX(checkpoints.position, excluded.position),
            updated_at = datetime('now')
         RETURNING position",
        params![stream, position],
        |row| row.get(0),
    )?;
    Ok(stored)
}
