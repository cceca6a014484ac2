//! Process-lifetime DID → handle cache.
//!
//! Entries are never evicted or invalidated, so a renamed account keeps its
//! old handle until the process restarts.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::collaborator::SocialClient;
use crate::error::EffectError;

pub struct HandleCache {
    social: Arc<dyn SocialClient>,
    // std lock: held only for map access, never across an await.
    entries: RwLock<HashMap<String, String>>,
}

impl HandleCache {
    pub fn new(social: Arc<dyn SocialClient>) -> Self {
        Self {
            social,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached handle, if any.
    pub fn cached(&self, did: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(did).cloned()
    }

    /// Seeds the cache with a handle learned elsewhere (e.g. from a record body).
    pub fn remember(&self, did: &str, handle: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries
            .entry(did.to_string())
            .or_insert_with(|| handle.to_string());
    }

    /// Returns the handle for `did`, looking it up on a miss.
    ///
    /// Failed lookups are not cached.
    pub async fn resolve(&self, did: &str) -> Result<String, EffectError> {
        if let Some(handle) = self.cached(did) {
            return Ok(handle);
        }
        let handle = self.social.get_handle(did).await?;
        tracing::debug!(did, handle = %handle, "resolved handle");
        self.remember(did, &handle);
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
