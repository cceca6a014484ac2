//! The two ingestion loops: live stream and backfill.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use verilist_ledger::CheckpointStore;

use crate::collaborator::RecordLister;
use crate::error::SourceError;
use crate::executor::{EventOutcome, FanoutExecutor};
use crate::rate::CallClass;
use crate::shutdown::Shutdown;
use crate::source::{BackfillSource, Cursor, EventSource, SourcedEvent};

/// Counters for one run of the stream loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub events: u64,
    pub skipped: u64,
    pub deletions: u64,
    pub performed: u64,
    pub failed_sinks: u64,
    pub held: u64,
    /// Held events that later completed on retry.
    pub recovered: u64,
    pub last_checkpoint: Option<i64>,
}

impl StreamSummary {
    fn record(&mut self, outcome: &EventOutcome) {
        self.events += 1;
        match outcome {
            EventOutcome::Skipped => self.skipped += 1,
            EventOutcome::CheckpointOnly => self.deletions += 1,
            EventOutcome::Dispatched(_) | EventOutcome::Interrupted(_) => {}
        }
        self.performed += outcome.performed() as u64;
        self.failed_sinks += outcome.failed() as u64;
    }
}

/// Consumes `source` one event at a time until shutdown or exhaustion.
///
/// The checkpoint is saved only after the executor returns for an event,
/// so a crash mid fan-out replays that event on restart. Events are never
/// processed concurrently: sinks for the same subject must not race.
///
/// An event on which no sink completed is held. Later events still run, but
/// the checkpoint stays below the oldest held position until that event is
/// retried successfully. Held events are retried whenever a later event
/// completes something.
///
/// # Errors
///
/// Returns `SourceError` if the source gives up (e.g. cannot reconnect).
/// Event- and sink-level failures are logged and never end the loop.
pub async fn run_stream<S>(
    source: &mut S,
    executor: &FanoutExecutor,
    checkpoint: &CheckpointStore,
    shutdown: &mut Shutdown,
) -> Result<StreamSummary, SourceError>
where
    S: EventSource + ?Sized,
{
    let mut summary = StreamSummary::default();
    let mut held: Vec<SourcedEvent> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.wait() => {
                tracing::info!("shutdown requested, closing stream");
                break;
            }
            next = source.next_event() => next?,
        };
        let Some(item) = next else {
            tracing::info!("event source exhausted");
            break;
        };

        let outcome = executor.process(&item.event, shutdown).await;
        summary.record(&outcome);

        if let EventOutcome::Interrupted(_) = outcome {
            break;
        }
        if !outcome.advances_checkpoint() {
            summary.held += 1;
            tracing::warn!(
                subject = %item.event.subject_id,
                verifier = %item.event.verifier_id,
                cursor = ?item.cursor,
                "no sink completed, holding checkpoint below this event"
            );
            held.push(item);
            continue;
        }

        if !held.is_empty() && retry_held(&mut held, executor, shutdown, &mut summary).await {
            break;
        }

        let Cursor::Stream(position) = item.cursor else {
            continue;
        };
        let position = match held.first().map(|h| &h.cursor) {
            Some(Cursor::Stream(floor)) => position.min(floor - 1),
            _ => position,
        };
        match checkpoint.save(position).await {
            Ok(stored) => summary.last_checkpoint = Some(stored),
            Err(e) => tracing::error!(
                stream = checkpoint.stream(),
                position,
                error = %e,
                "failed to save checkpoint"
            ),
        }
    }

    tracing::info!(
        events = summary.events,
        performed = summary.performed,
        failed_sinks = summary.failed_sinks,
        still_held = held.len(),
        checkpoint = ?summary.last_checkpoint,
        "stream loop stopped"
    );
    Ok(summary)
}

/// Runs held events again, oldest first, dropping those that now complete.
///
/// Returns true if shutdown interrupted a retry.
async fn retry_held(
    held: &mut Vec<SourcedEvent>,
    executor: &FanoutExecutor,
    shutdown: &Shutdown,
    summary: &mut StreamSummary,
) -> bool {
    let mut still_held = Vec::with_capacity(held.len());
    let mut interrupted = false;

    for item in held.drain(..) {
        if interrupted {
            still_held.push(item);
            continue;
        }
        let outcome = executor.process(&item.event, shutdown).await;
        summary.performed += outcome.performed() as u64;
        summary.failed_sinks += outcome.failed() as u64;
        match outcome {
            EventOutcome::Interrupted(_) => {
                interrupted = true;
                still_held.push(item);
            }
            ref done if done.advances_checkpoint() => {
                summary.recovered += 1;
                tracing::info!(
                    subject = %item.event.subject_id,
                    verifier = %item.event.verifier_id,
                    cursor = ?item.cursor,
                    "held event completed on retry"
                );
            }
            _ => still_held.push(item),
        }
    }

    *held = still_held;
    interrupted
}

#[derive(Debug, Clone)]
pub struct BackfillSettings {
    /// Record collection to walk.
    pub collection: String,
    /// Records per page.
    pub page_limit: u32,
    /// Verifiers walked at the same time.
    pub concurrency: usize,
}

/// Counters for one verifier's backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifierReport {
    pub verifier_id: String,
    pub pages: u32,
    pub processed: u64,
    pub performed: u64,
    pub already_done: u64,
    pub failed: u64,
    pub interrupted: bool,
}

/// Walks one verifier's history, processing records strictly in order.
pub async fn backfill_verifier(
    lister: Arc<dyn RecordLister>,
    executor: &FanoutExecutor,
    verifier_id: &str,
    settings: &BackfillSettings,
    shutdown: &Shutdown,
) -> VerifierReport {
    tracing::info!(verifier = verifier_id, "backfilling verifier");

    let mut report = VerifierReport {
        verifier_id: verifier_id.to_string(),
        ..Default::default()
    };
    let mut source = BackfillSource::new(
        lister,
        executor.rate().clone(),
        verifier_id,
        settings.collection.clone(),
        settings.page_limit,
    );

    loop {
        if shutdown.is_triggered() {
            report.interrupted = true;
            break;
        }
        let item = match source.next_event().await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(verifier = verifier_id, error = %e, "backfill source failed");
                break;
            }
        };

        let outcome = executor.process(&item.event, shutdown).await;
        report.processed += 1;
        report.performed += outcome.performed() as u64;
        report.already_done += outcome.already_done() as u64;
        report.failed += outcome.failed() as u64;
        if let EventOutcome::Interrupted(_) = outcome {
            report.interrupted = true;
            break;
        }

        executor.rate().throttle(CallClass::Record).await;
    }

    report.pages = source.pages_fetched();
    tracing::info!(
        verifier = verifier_id,
        pages = report.pages,
        processed = report.processed,
        performed = report.performed,
        already_done = report.already_done,
        failed = report.failed,
        "completed backfill for verifier"
    );
    report
}

/// Backfills several verifiers, up to `settings.concurrency` at a time.
///
/// Blacklisted verifiers are not walked. Reports come back in completion
/// order.
pub async fn run_backfill(
    verifiers: Vec<String>,
    lister: Arc<dyn RecordLister>,
    executor: &FanoutExecutor,
    settings: &BackfillSettings,
    shutdown: &Shutdown,
) -> Vec<VerifierReport> {
    let verifiers: Vec<String> = verifiers
        .into_iter()
        .filter(|did| {
            let blacklisted = executor.directory().is_blacklisted(did);
            if blacklisted {
                tracing::info!(verifier = %did, "skipping blacklisted verifier");
            }
            !blacklisted
        })
        .collect();

    stream::iter(verifiers)
        .map(|did| {
            let lister = lister.clone();
            async move { backfill_verifier(lister, executor, &did, settings, shutdown).await }
        })
        .buffer_unordered(settings.concurrency.max(1))
        .collect()
        .await
}
