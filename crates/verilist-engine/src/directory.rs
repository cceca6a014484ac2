//! Static verifier configuration.

use std::collections::{HashMap, HashSet};

use verilist_types::VerifierProfile;

/// Lookup table from verifier DID to profile, plus the blacklist.
///
/// Built once from configuration and never mutated.
#[derive(Debug, Clone, Default)]
pub struct VerifierDirectory {
    order: Vec<String>,
    profiles: HashMap<String, VerifierProfile>,
    blacklist: HashSet<String>,
}

impl VerifierDirectory {
    pub fn new(
        profiles: impl IntoIterator<Item = VerifierProfile>,
        blacklist: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut order = Vec::new();
        let mut by_did = HashMap::new();
        for profile in profiles {
            if !by_did.contains_key(&profile.did) {
                order.push(profile.did.clone());
            }
            by_did.insert(profile.did.clone(), profile);
        }
        Self {
            order,
            profiles: by_did,
            blacklist: blacklist.into_iter().collect(),
        }
    }

    pub fn profile(&self, did: &str) -> Option<&VerifierProfile> {
        self.profiles.get(did)
    }

    /// True if the DID is on the blacklist or its profile is flagged.
    pub fn is_blacklisted(&self, did: &str) -> bool {
        self.blacklist.contains(did) || self.profile(did).is_some_and(|p| p.blacklisted)
    }

    /// Configured verifiers that are not blacklisted, in configuration order.
    pub fn active_verifiers(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|did| !self.is_blacklisted(did))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
