//! Authenticated client for the owner account.

use std::future::Future;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use verilist_engine::{EffectError, SocialClient};
use verilist_types::{RichText, LISTITEM_COLLECTION, POST_COLLECTION};

use crate::error::XrpcError;
use crate::xrpc::{CallOptions, XrpcClient};

/// Service the PDS proxies chat calls to.
pub const DEFAULT_CHAT_PROXY: &str = "did:web:api.bsky.chat#bsky_chat";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct Profile {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct ConvoEnvelope {
    convo: Convo,
}

#[derive(Debug, Deserialize)]
struct Convo {
    id: String,
}

/// Posts, list items and DMs on behalf of one account.
///
/// Writes go to the account's PDS; profile lookups go to the public app
/// view. The session is created lazily and refreshed once when a call fails
/// with `ExpiredToken`. If the refresh itself fails, the agent logs in again.
pub struct BskyAgent {
    pds: XrpcClient,
    appview: XrpcClient,
    credentials: Credentials,
    chat_proxy: String,
    session: RwLock<Option<Session>>,
}

impl BskyAgent {
    pub fn new(pds: XrpcClient, appview: XrpcClient, credentials: Credentials) -> Self {
        Self {
            pds,
            appview,
            credentials,
            chat_proxy: DEFAULT_CHAT_PROXY.to_string(),
            session: RwLock::new(None),
        }
    }

    pub fn with_chat_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.chat_proxy = proxy.into();
        self
    }

    /// Creates a fresh session with the configured credentials.
    pub async fn login(&self) -> Result<Session, XrpcError> {
        let session: Session = self
            .pds
            .procedure(
                "com.atproto.server.createSession",
                &json!({
                    "identifier": self.credentials.identifier,
                    "password": self.credentials.password,
                }),
                CallOptions::default(),
            )
            .await?;
        tracing::info!(did = %session.did, handle = %session.handle, "logged in");
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn current(&self) -> Result<Session, XrpcError> {
        match self.session().await {
            Some(session) => Ok(session),
            None => self.login().await,
        }
    }

    async fn refresh(&self) -> Result<(), XrpcError> {
        let Some(stale) = self.session().await else {
            self.login().await?;
            return Ok(());
        };
        let refreshed: Result<Session, XrpcError> = self
            .pds
            .procedure_empty(
                "com.atproto.server.refreshSession",
                CallOptions::authed(&stale.refresh_jwt),
            )
            .await;
        match refreshed {
            Ok(session) => {
                tracing::debug!(did = %session.did, "session refreshed");
                *self.session.write().await = Some(session);
            }
            Err(e) => {
                tracing::warn!(error = %e, "session refresh failed, logging in again");
                self.login().await?;
            }
        }
        Ok(())
    }

    /// Runs `call` with the access token, refreshing once on `ExpiredToken`.
    async fn authed<T, F, Fut>(&self, call: F) -> Result<T, XrpcError>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = Result<T, XrpcError>>,
    {
        match call(self.current().await?).await {
            Err(e) if e.is_expired_token() => {
                self.refresh().await?;
                call(self.current().await?).await
            }
            other => other,
        }
    }

    async fn create_record(&self, collection: &str, record: Value) -> Result<String, XrpcError> {
        let record = &record;
        let created: CreatedRecord = self
            .authed(|session| async move {
                self.pds
                    .procedure(
                        "com.atproto.repo.createRecord",
                        &json!({
                            "repo": session.did,
                            "collection": collection,
                            "record": record,
                        }),
                        CallOptions::authed(&session.access_jwt),
                    )
                    .await
            })
            .await?;
        Ok(created.uri)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds an `app.bsky.feed.post` record with mention facets.
pub fn post_record(text: &RichText, created_at: &str) -> Value {
    let (text, mentions) = text.render();
    let facets: Vec<Value> = mentions
        .into_iter()
        .map(|m| {
            json!({
                "index": { "byteStart": m.byte_start, "byteEnd": m.byte_end },
                "features": [{ "$type": "app.bsky.richtext.facet#mention", "did": m.did }],
            })
        })
        .collect();
    let mut record = json!({
        "$type": POST_COLLECTION,
        "text": text,
        "langs": ["en"],
        "createdAt": created_at,
    });
    if !facets.is_empty() {
        record["facets"] = Value::Array(facets);
    }
    record
}

/// Builds an `app.bsky.graph.listitem` record.
pub fn list_item_record(list_uri: &str, subject_id: &str, created_at: &str) -> Value {
    json!({
        "$type": LISTITEM_COLLECTION,
        "subject": subject_id,
        "list": list_uri,
        "createdAt": created_at,
    })
}

#[async_trait]
impl SocialClient for BskyAgent {
    async fn create_post(&self, text: &RichText) -> Result<String, EffectError> {
        Ok(self
            .create_record(POST_COLLECTION, post_record(text, &now()))
            .await?)
    }

    async fn add_list_member(&self, list_uri: &str, subject_id: &str) -> Result<String, EffectError> {
        Ok(self
            .create_record(LISTITEM_COLLECTION, list_item_record(list_uri, subject_id, &now()))
            .await?)
    }

    async fn get_handle(&self, did: &str) -> Result<String, EffectError> {
        let profile: Profile = self
            .appview
            .query("app.bsky.actor.getProfile", &[("actor", did)], CallOptions::default())
            .await?;
        Ok(profile.handle)
    }

    async fn send_direct_message(&self, recipient: &str, text: &str) -> Result<(), EffectError> {
        let proxy = self.chat_proxy.as_str();
        let envelope: ConvoEnvelope = self
            .authed(|session| async move {
                self.pds
                    .query(
                        "chat.bsky.convo.getConvoForMembers",
                        &[("members", recipient)],
                        CallOptions::authed(&session.access_jwt).via(proxy),
                    )
                    .await
            })
            .await?;

        let convo_id = envelope.convo.id.as_str();
        let _: IgnoredAny = self
            .authed(|session| async move {
                self.pds
                    .procedure(
                        "chat.bsky.convo.sendMessage",
                        &json!({ "convoId": convo_id, "message": { "text": text } }),
                        CallOptions::authed(&session.access_jwt).via(proxy),
                    )
                    .await
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_record_carries_mention_facet() {
        let text = RichText::new()
            .mention("alice.test", "did:plc:alice")
            .text(" has been verified by Bluesky.");
        let record = post_record(&text, "2025-04-21T18:00:00.000Z");

        assert_eq!(record["text"], "@alice.test has been verified by Bluesky.");
        assert_eq!(record["facets"][0]["index"]["byteStart"], 0);
        assert_eq!(record["facets"][0]["index"]["byteEnd"], 11);
        assert_eq!(
            record["facets"][0]["features"][0]["$type"],
            "app.bsky.richtext.facet#mention"
        );
        assert_eq!(record["facets"][0]["features"][0]["did"], "did:plc:alice");
    }

    #[test]
    fn plain_post_has_no_facets() {
        let record = post_record(&RichText::new().text("hello"), "2025-04-21T18:00:00.000Z");
        assert!(record.get("facets").is_none());
    }

    #[test]
    fn list_item_points_at_list_and_subject() {
        let record = list_item_record("at://did:plc:o/app.bsky.graph.list/l1", "did:plc:s", "t");
        assert_eq!(record["$type"], LISTITEM_COLLECTION);
        assert_eq!(record["list"], "at://did:plc:o/app.bsky.graph.list/l1");
        assert_eq!(record["subject"], "did:plc:s");
    }
}
