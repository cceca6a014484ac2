//! The seams between the engine and the network.
//!
//! Implementations live in `verilist-atproto`; tests use in-memory fakes.

use async_trait::async_trait;
use serde::Deserialize;
use verilist_types::{LinkQuery, RichText};

use crate::error::{EffectError, RemoteError};
use crate::source::VerificationRecord;

/// Side-effecting and lookup calls against the social network.
///
/// One client is constructed at startup, authenticated once, and shared by
/// every pipeline for the lifetime of the process.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Publishes a post and returns its AT-URI.
    async fn create_post(&self, text: &RichText) -> Result<String, EffectError>;

    /// Adds `subject_id` to the list at `list_uri` and returns the list item's AT-URI.
    async fn add_list_member(&self, list_uri: &str, subject_id: &str)
        -> Result<String, EffectError>;

    /// Resolves a DID to its current handle.
    async fn get_handle(&self, did: &str) -> Result<String, EffectError>;

    /// Sends a direct message to `recipient`.
    async fn send_direct_message(&self, recipient: &str, text: &str) -> Result<(), EffectError>;
}

/// A backlink index over the whole network.
#[async_trait]
pub trait LinkIndex: Send + Sync {
    /// Returns the distinct DIDs whose records link to `target` through
    /// `query`, optionally restricted to `from_did`.
    async fn distinct_linking_dids(
        &self,
        target: &str,
        query: &LinkQuery,
        from_did: Option<&str>,
    ) -> Result<Vec<String>, RemoteError>;
}

/// One record as returned by `com.atproto.repo.listRecords`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListedRecord {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub value: VerificationRecord,
}

/// One page of listed records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<ListedRecord>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Paginated access to a repository's records.
#[async_trait]
pub trait RecordLister: Send + Sync {
    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RemoteError>;
}
