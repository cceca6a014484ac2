//! Second line of defense against duplicate effects.
//!
//! The ledger only knows what this process recorded. The oracle asks the
//! network-wide backlink index whether the owner account already has a
//! record pointing at the subject, which catches effects made by a previous
//! instance whose ledger was lost, or made by hand.

use std::sync::Arc;

use verilist_types::LinkQuery;

use crate::collaborator::LinkIndex;

pub struct Oracle {
    index: Arc<dyn LinkIndex>,
    owner_did: String,
}

impl Oracle {
    pub fn new(index: Arc<dyn LinkIndex>, owner_did: impl Into<String>) -> Self {
        Self {
            index,
            owner_did: owner_did.into(),
        }
    }

    pub fn owner_did(&self) -> &str {
        &self.owner_did
    }

    /// Returns true if the owner already links to `subject_id` through `query`.
    ///
    /// Any failure answers `false`.
    pub async fn already_linked(&self, subject_id: &str, query: &LinkQuery) -> bool {
        match self
            .index
            .distinct_linking_dids(subject_id, query, Some(&self.owner_did))
            .await
        {
            Ok(dids) => dids.iter().any(|did| did == &self.owner_did),
            Err(e) => {
                tracing::warn!(
                    subject = subject_id,
                    collection = %query.collection,
                    error = %e,
                    "link index query failed, assuming not linked"
                );
                false
            }
        }
    }
}
