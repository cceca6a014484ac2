//! Finite source over a verifier's record history.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use verilist_types::{EventKind, VerificationEvent};

use super::{rkey_of, Cursor, EventSource, SourcedEvent};
use crate::collaborator::{ListedRecord, RecordLister, RecordPage};
use crate::error::SourceError;
use crate::rate::{CallClass, RateController};

/// Walks `listRecords` pages for one verifier.
///
/// Ends when a page comes back empty or without a cursor. A failed page
/// request is logged and treated as an empty page: the walk for this
/// verifier stops and the next run starts over, relying on the ledger to
/// skip what was already done.
pub struct BackfillSource {
    lister: Arc<dyn RecordLister>,
    rate: Arc<RateController>,
    verifier_id: String,
    collection: String,
    page_limit: u32,
    buffered: VecDeque<SourcedEvent>,
    next_cursor: Option<String>,
    pages: u32,
    finished: bool,
}

impl BackfillSource {
    pub fn new(
        lister: Arc<dyn RecordLister>,
        rate: Arc<RateController>,
        verifier_id: impl Into<String>,
        collection: impl Into<String>,
        page_limit: u32,
    ) -> Self {
        Self {
            lister,
            rate,
            verifier_id: verifier_id.into(),
            collection: collection.into(),
            page_limit,
            buffered: VecDeque::new(),
            next_cursor: None,
            pages: 0,
            finished: false,
        }
    }

    /// Number of page requests made so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    async fn fetch_page(&mut self) -> RecordPage {
        if self.pages > 0 {
            self.rate.throttle(CallClass::Page).await;
        }
        self.pages += 1;
        match self
            .lister
            .list_records(
                &self.verifier_id,
                &self.collection,
                self.page_limit,
                self.next_cursor.as_deref(),
            )
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    verifier = %self.verifier_id,
                    page = self.pages,
                    error = %e,
                    "failed to fetch verification records"
                );
                RecordPage::default()
            }
        }
    }

    fn to_event(&self, record: ListedRecord) -> VerificationEvent {
        let occurred_at = record.value.created_at().unwrap_or_else(|| {
            tracing::debug!(uri = %record.uri, "record has no valid createdAt, using now");
            Utc::now()
        });
        VerificationEvent {
            subject_id: record.value.subject,
            verifier_id: self.verifier_id.clone(),
            occurred_at,
            sequence: None,
            kind: EventKind::Created,
            record_key: rkey_of(&record.uri),
            subject_handle: record.value.handle,
            subject_display_name: record.value.display_name,
        }
    }
}

#[async_trait]
impl EventSource for BackfillSource {
    async fn next_event(&mut self) -> Result<Option<SourcedEvent>, SourceError> {
        if let Some(event) = self.buffered.pop_front() {
            return Ok(Some(event));
        }
        if self.finished || (self.pages > 0 && self.next_cursor.is_none()) {
            self.finished = true;
            return Ok(None);
        }

        let page = self.fetch_page().await;
        if page.records.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        tracing::info!(
            verifier = %self.verifier_id,
            page = self.pages,
            records = page.records.len(),
            "processing verification records"
        );
        self.next_cursor = page.cursor;
        for record in page.records {
            let event = self.to_event(record);
            self.buffered.push_back(SourcedEvent {
                event,
                cursor: Cursor::Page(self.next_cursor.clone()),
            });
        }
        Ok(self.buffered.pop_front())
    }
}
