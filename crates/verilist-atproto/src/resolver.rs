//! DID to PDS resolution.

use std::collections::HashMap;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::ResolveError;

pub const DEFAULT_PLC_DIRECTORY: &str = "https://plc.directory";

#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(default)]
    service: Vec<Service>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Service {
    id: String,
    service_endpoint: String,
}

/// Finds the PDS hosting a repository.
///
/// Successful lookups are cached for the life of the process. Failed ones
/// fall back to `default_pds` and are retried on the next call.
pub struct PdsResolver {
    http: reqwest::Client,
    plc_directory: String,
    default_pds: String,
    cache: RwLock<HashMap<String, String>>,
}

impl PdsResolver {
    pub fn new(
        http: reqwest::Client,
        plc_directory: impl Into<String>,
        default_pds: impl Into<String>,
    ) -> Self {
        Self {
            http,
            plc_directory: plc_directory.into().trim_end_matches('/').to_string(),
            default_pds: default_pds.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// PDS endpoint for `did`, or the default PDS if it cannot be resolved.
    pub async fn resolve(&self, did: &str) -> String {
        match self.lookup(did).await {
            Ok(pds) => pds,
            Err(e) => {
                tracing::warn!(did, error = %e, fallback = %self.default_pds, "could not resolve pds");
                self.default_pds.clone()
            }
        }
    }

    /// PDS endpoint for `did`.
    pub async fn lookup(&self, did: &str) -> Result<String, ResolveError> {
        if let Some(pds) = self.cache.read().await.get(did) {
            return Ok(pds.clone());
        }

        let url = self.document_url(did)?;
        let document: DidDocument = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let pds = document
            .service
            .into_iter()
            .find(|s| s.id.ends_with("#atproto_pds"))
            .map(|s| s.service_endpoint)
            .ok_or_else(|| ResolveError::NoPds(did.to_string()))?;

        tracing::debug!(did, pds = %pds, "resolved pds");
        self.cache.write().await.insert(did.to_string(), pds.clone());
        Ok(pds)
    }

    fn document_url(&self, did: &str) -> Result<String, ResolveError> {
        if did.starts_with("did:plc:") {
            Ok(format!("{}/{did}", self.plc_directory))
        } else if let Some(host) = did.strip_prefix("did:web:") {
            Ok(format!("https://{}/.well-known/did.json", host.replace("%3A", ":")))
        } else {
            Err(ResolveError::UnsupportedMethod(did.to_string()))
        }
    }
}
