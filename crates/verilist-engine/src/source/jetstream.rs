//! Live subscription to a Jetstream instance.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use verilist_types::{EventKind, VerificationEvent};

use super::{Cursor, EventSource, SourcedEvent, VerificationRecord};
use crate::error::SourceError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct JetstreamSettings {
    /// Subscription endpoint, e.g. `wss://jetstream2.us-east.bsky.network/subscribe`.
    pub endpoint: String,
    /// Collection to subscribe to.
    pub collection: String,
    /// Wait between a dropped connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Give up after this many consecutive failed connection attempts.
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

/// A conceptually infinite source backed by a WebSocket subscription.
///
/// After a disconnect it resubscribes from the last yielded `time_us`, so the
/// most recent event may be delivered twice but none is skipped.
pub struct JetstreamSource {
    settings: JetstreamSettings,
    cursor: Option<i64>,
    socket: Option<Socket>,
    failed_attempts: u32,
}

impl JetstreamSource {
    /// Creates a source that resumes at `resume_from` (`time_us`), or at the
    /// live tip when `None`. Nothing connects until the first `next_event`.
    pub fn new(settings: JetstreamSettings, resume_from: Option<i64>) -> Self {
        Self {
            settings,
            cursor: resume_from,
            socket: None,
            failed_attempts: 0,
        }
    }

    /// Position of the last yielded event.
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    /// Builds the subscription URL for the current cursor.
    pub fn subscribe_url(&self) -> Result<String, SourceError> {
        let mut url = url::Url::parse(&self.settings.endpoint)
            .map_err(|e| SourceError::Endpoint(format!("{}: {e}", self.settings.endpoint)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("wantedCollections", &self.settings.collection);
            if let Some(cursor) = self.cursor {
                query.append_pair("cursor", &cursor.to_string());
            }
        }
        Ok(url.into())
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        let url = self.subscribe_url()?;
        loop {
            match connect_async(url.as_str()).await {
                Ok((socket, _)) => {
                    tracing::info!(url = %url, cursor = ?self.cursor, "subscribed to jetstream");
                    self.socket = Some(socket);
                    self.failed_attempts = 0;
                    return Ok(());
                }
                Err(e) => {
                    self.failed_attempts += 1;
                    if self
                        .settings
                        .max_reconnect_attempts
                        .is_some_and(|max| self.failed_attempts >= max)
                    {
                        return Err(SourceError::Connect {
                            attempts: self.failed_attempts,
                            reason: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        attempt = self.failed_attempts,
                        error = %e,
                        "jetstream connection failed, retrying"
                    );
                    tokio::time::sleep(self.settings.reconnect_delay).await;
                }
            }
        }
    }

    async fn drop_connection(&mut self, reason: &str) {
        tracing::warn!(reason, cursor = ?self.cursor, "jetstream connection lost");
        self.socket = None;
        tokio::time::sleep(self.settings.reconnect_delay).await;
    }
}

#[async_trait]
impl EventSource for JetstreamSource {
    async fn next_event(&mut self) -> Result<Option<SourcedEvent>, SourceError> {
        loop {
            if self.socket.is_none() {
                self.connect().await?;
            }
            let Some(socket) = self.socket.as_mut() else {
                continue;
            };

            let message = socket.next().await;
            match message {
                Some(Ok(Message::Text(text))) => {
                    match parse_message(text.as_str(), &self.settings.collection) {
                        Ok(Some(event)) => {
                            let position = event.sequence.unwrap_or_default();
                            self.cursor = Some(position);
                            return Ok(Some(SourcedEvent {
                                event,
                                cursor: Cursor::Stream(position),
                            }));
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "skipping malformed jetstream message"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by server".to_string());
                    self.drop_connection(&reason).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => self.drop_connection(&e.to_string()).await,
                None => self.drop_connection("stream ended").await,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct JetstreamMessage {
    did: String,
    time_us: i64,
    kind: String,
    #[serde(default)]
    commit: Option<JetstreamCommit>,
}

#[derive(Debug, Deserialize)]
struct JetstreamCommit {
    operation: String,
    collection: String,
    #[serde(default)]
    rkey: Option<String>,
    #[serde(default)]
    record: Option<VerificationRecord>,
}

/// Decodes one Jetstream message.
///
/// Returns `Ok(None)` for messages that are not create/delete commits in
/// `collection` (identity and account events, updates, other collections).
pub fn parse_message(
    text: &str,
    collection: &str,
) -> Result<Option<VerificationEvent>, serde_json::Error> {
    let message: JetstreamMessage = serde_json::from_str(text)?;
    if message.kind != "commit" {
        return Ok(None);
    }
    let Some(commit) = message.commit else {
        return Ok(None);
    };
    if commit.collection != collection {
        return Ok(None);
    }

    let observed_at = DateTime::<Utc>::from_timestamp_micros(message.time_us).unwrap_or_default();

    let event = match (commit.operation.as_str(), commit.record) {
        ("create", Some(record)) => VerificationEvent {
            occurred_at: record.created_at().unwrap_or(observed_at),
            subject_id: record.subject,
            verifier_id: message.did,
            sequence: Some(message.time_us),
            kind: EventKind::Created,
            record_key: commit.rkey,
            subject_handle: record.handle,
            subject_display_name: record.display_name,
        },
        ("delete", _) => VerificationEvent {
            subject_id: String::new(),
            verifier_id: message.did,
            occurred_at: observed_at,
            sequence: Some(message.time_us),
            kind: EventKind::Deleted,
            record_key: commit.rkey,
            subject_handle: None,
            subject_display_name: None,
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}
