//! Constellation backlink index.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;
use verilist_engine::{LinkIndex, RemoteError};
use verilist_types::LinkQuery;

#[derive(Debug, Deserialize)]
struct DistinctDids {
    #[serde(default)]
    linking_dids: Vec<String>,
}

pub struct ConstellationIndex {
    http: reqwest::Client,
    base: Url,
}

impl ConstellationIndex {
    pub fn new(http: reqwest::Client, base: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            base: Url::parse(base)?,
        })
    }
}

#[async_trait]
impl LinkIndex for ConstellationIndex {
    async fn distinct_linking_dids(
        &self,
        target: &str,
        query: &LinkQuery,
        from_did: Option<&str>,
    ) -> Result<Vec<String>, RemoteError> {
        let url = self
            .base
            .join("/links/distinct-dids")
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let mut params = vec![
            ("target", target),
            ("collection", query.collection.as_str()),
            ("path", query.path.as_str()),
        ];
        if let Some(did) = from_did {
            params.push(("from_dids", did));
        }

        let response = self
            .http
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }
        let body: DistinctDids = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(body.linking_dids)
    }
}
