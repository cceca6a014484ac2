//! Event sources: the live Jetstream subscription and paginated backfill.
//!
//! Both yield one [`SourcedEvent`] at a time. The cursor attached to an
//! event is what the caller persists *after* fully handling that event, so a
//! restart may replay the last handled event but never skips one.

mod backfill;
mod jetstream;

pub use backfill::BackfillSource;
pub use jetstream::{parse_message, JetstreamSettings, JetstreamSource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use verilist_types::VerificationEvent;

use crate::error::SourceError;

/// Resume position surfaced with each event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Stream position (`time_us`); persisted as the checkpoint.
    Stream(i64),
    /// Token of the page after the one holding the event; `None` on the last page.
    Page(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedEvent {
    pub event: VerificationEvent,
    pub cursor: Cursor,
}

/// A lazy, ordered sequence of verification events.
#[async_trait]
pub trait EventSource: Send {
    /// Returns the next event, or `None` once a finite source is exhausted.
    async fn next_event(&mut self) -> Result<Option<SourcedEvent>, SourceError>;
}

/// Body of an `app.bsky.graph.verification` record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub subject: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub created_at: String,
}

impl VerificationRecord {
    /// Parses `createdAt`, if it is valid RFC 3339.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }
}

/// Record key: the last path segment of an AT-URI.
pub(crate) fn rkey_of(uri: &str) -> Option<String> {
    uri.rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string)
}
