use std::sync::Arc;

use async_trait::async_trait;
use verilist_engine::{RecordLister, RecordPage, RemoteError};

use crate::resolver::PdsResolver;
use crate::xrpc::{CallOptions, XrpcClient};

/// `com.atproto.repo.listRecords` against each repository's own PDS.
pub struct RepoLister {
    http: reqwest::Client,
    resolver: Arc<PdsResolver>,
}

impl RepoLister {
    pub fn new(http: reqwest::Client, resolver: Arc<PdsResolver>) -> Self {
        Self { http, resolver }
    }
}

#[async_trait]
impl RecordLister for RepoLister {
    async fn list_records(
        &self,
        repo: &str,
        collection: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RemoteError> {
        let pds = self.resolver.resolve(repo).await;
        let client = XrpcClient::new(self.http.clone(), &pds)?;

        let limit = limit.to_string();
        let mut params = vec![("repo", repo), ("collection", collection), ("limit", limit.as_str())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        Ok(client
            .query("com.atproto.repo.listRecords", &params, CallOptions::default())
            .await?)
    }
}
