//! Shared types for the verilist workspace.
//!
//! This crate holds the event model that flows from the sources through the
//! fan-out executor, the sink identifiers that key the idempotency ledger,
//! and the static verifier profiles loaded from configuration. It has no I/O
//! and no async code so every other crate can depend on it.

mod richtext;

pub use richtext::{MentionSpan, RichText, Segment};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record collection carrying verification facts.
pub const VERIFICATION_COLLECTION: &str = "app.bsky.graph.verification";

/// Record collection for membership list entries.
pub const LISTITEM_COLLECTION: &str = "app.bsky.graph.listitem";

/// Record collection for feed posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Record collection for membership lists themselves.
pub const LIST_COLLECTION: &str = "app.bsky.graph.list";

/// Whether a verification record was created or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A verification record was created.
    Created,
    /// A verification record was deleted.
    Deleted,
}

impl EventKind {
    /// Returns the lowercase label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
        }
    }
}

/// The unit of work: one verifier asserting (or retracting) a fact about a subject.
///
/// Deletions observed on the stream carry no record body, so `subject_id` is
/// empty for them. They are only used to advance the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEvent {
    /// DID of the account being verified.
    pub subject_id: String,
    /// DID of the account that authored the verification record.
    pub verifier_id: String,
    /// Timestamp from the source record, used as the logical time of every effect.
    pub occurred_at: DateTime<Utc>,
    /// Stream position (`time_us`). Absent for backfilled records.
    pub sequence: Option<i64>,
    /// Created or deleted.
    pub kind: EventKind,
    /// Record key of the verification record, when known.
    #[serde(default)]
    pub record_key: Option<String>,
    /// Subject handle as copied into the verification record.
    #[serde(default)]
    pub subject_handle: Option<String>,
    /// Subject display name as copied into the verification record.
    #[serde(default)]
    pub subject_display_name: Option<String>,
}

impl VerificationEvent {
    /// Builds a creation event with no optional metadata.
    pub fn created(
        subject_id: impl Into<String>,
        verifier_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            verifier_id: verifier_id.into(),
            occurred_at,
            sequence: None,
            kind: EventKind::Created,
            record_key: None,
            subject_handle: None,
            subject_display_name: None,
        }
    }

    /// Sets the stream position.
    pub fn with_sequence(mut self, sequence: i64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// A distinct idempotent side-effect target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkId {
    /// The public announcement post.
    Announcement,
    /// The catch-all list every verified account is added to.
    CatchAllList,
    /// A verifier-specific list, identified by its record key.
    VerifierList(String),
}

impl SinkId {
    /// Returns the key stored in the ledger's `sink_id` column.
    pub fn as_key(&self) -> String {
        match self {
            Self::Announcement => "announcement".to_string(),
            Self::CatchAllList => "list:all".to_string(),
            Self::VerifierList(rkey) => format!("list:{rkey}"),
        }
    }

    /// Returns true for the list membership sinks.
    pub fn is_list(&self) -> bool {
        !matches!(self, Self::Announcement)
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl std::str::FromStr for SinkId {
    type Err = ParseSinkIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "announcement" => Ok(Self::Announcement),
            "list:all" => Ok(Self::CatchAllList),
            other => match other.strip_prefix("list:") {
                Some(rkey) if !rkey.is_empty() => Ok(Self::VerifierList(rkey.to_string())),
                _ => Err(ParseSinkIdError(s.to_string())),
            },
        }
    }
}

/// Error returned when parsing an unknown sink key.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown sink id: {0}")]
pub struct ParseSinkIdError(pub String);

/// Compound idempotency key of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectKey {
    /// DID of the verified account.
    pub subject_id: String,
    /// DID of the verifier.
    pub verifier_id: String,
    /// Which side effect.
    pub sink: SinkId,
}

impl EffectKey {
    /// Builds the key for one sink of an event.
    pub fn for_event(event: &VerificationEvent, sink: SinkId) -> Self {
        Self {
            subject_id: event.subject_id.clone(),
            verifier_id: event.verifier_id.clone(),
            sink,
        }
    }
}

/// A ledger row: proof that an effect was performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectRecord {
    /// The idempotency key.
    pub key: EffectKey,
    /// Handle returned by the side effect (an AT-URI).
    pub external_ref: String,
    /// Logical time of the effect (the event's `occurred_at`).
    pub performed_at: DateTime<Utc>,
}

/// Static description of a known verifier.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerifierProfile {
    /// The verifier's DID.
    pub did: String,
    /// Human-readable organisation name, e.g. "The New York Times".
    #[serde(default)]
    pub name: Option<String>,
    /// Display handle used in announcements.
    #[serde(default)]
    pub handle: Option<String>,
    /// Record keys of the lists this verifier's subjects are added to.
    #[serde(default)]
    pub lists: Vec<String>,
    /// Events from blacklisted verifiers are ignored entirely.
    #[serde(default)]
    pub blacklisted: bool,
}

/// Where the link index looks for existing records pointing at a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkQuery {
    /// Record collection, e.g. `app.bsky.graph.listitem`.
    pub collection: String,
    /// Path of the linking field inside the record, e.g. `.subject`.
    pub path: String,
}

impl LinkQuery {
    /// Backlinks created by list items pointing at the subject.
    pub fn list_items() -> Self {
        Self {
            collection: LISTITEM_COLLECTION.to_string(),
            path: ".subject".to_string(),
        }
    }

    /// Backlinks created by posts mentioning the subject.
    pub fn post_mentions() -> Self {
        Self {
            collection: POST_COLLECTION.to_string(),
            path: ".facets[app.bsky.richtext.facet].features[app.bsky.richtext.facet#mention].did"
                .to_string(),
        }
    }

    /// Returns the query used to look for prior completion of a sink.
    pub fn for_sink(sink: &SinkId) -> Self {
        if sink.is_list() {
            Self::list_items()
        } else {
            Self::post_mentions()
        }
    }
}
