//! The fan-out executor: dedup and perform every sink of one event.
//!
//! Per event:
//!
//! ```text
//! Observed ─┬─ blacklisted verifier ─────────────→ Skipped
//!           ├─ deletion ─────────────────────────→ CheckpointOnly
//!           └─ for each sink, in order:
//!                ledger row?        → AlreadyRecorded    (list sinks: any verifier)
//!                owner links it?    → AlreadyLinked      (oracle, fails open)
//!                throttle, perform  → Performed + ledger row
//!                                   | AlreadyExists      (collaborator says so)
//!                                   | Failed             (surfaced, not retried)
//!              ─────────────────────────────────────→ Dispatched
//! ```
//!
//! Sinks are independent. A failure on one never stops the others, and the
//! next delivery of the same event (or the next backfill run) is the retry.
//!
//! The announcement is keyed per verifier. List membership is a property of
//! the subject, so a list sink already recorded under another verifier
//! counts as done. Events for the same subject are fanned out one at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use verilist_ledger::Ledger;
use verilist_types::{
    EffectKey, EffectRecord, EventKind, LinkQuery, RichText, SinkId, VerificationEvent,
    VerifierProfile, LIST_COLLECTION,
};

use crate::collaborator::{LinkIndex, SocialClient};
use crate::directory::VerifierDirectory;
use crate::error::EffectError;
use crate::handles::HandleCache;
use crate::messages;
use crate::oracle::Oracle;
use crate::rate::{CallClass, RateController};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Account that owns the lists and authors the posts.
    pub owner_did: String,
    /// Record key of the catch-all list.
    pub catch_all_list: String,
    /// Whether the announcement sink applies.
    pub announce: bool,
    /// Recipient of configuration-gap notices.
    pub operator_did: Option<String>,
}

/// Terminal state of one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// The effect was performed now and recorded.
    Performed { external_ref: String },
    /// The ledger already had a row.
    AlreadyRecorded,
    /// The link index shows the owner already links to the subject.
    AlreadyLinked,
    /// The collaborator reported the record already exists.
    AlreadyExists,
    /// The call failed; retried on the next delivery.
    Failed { reason: String },
}

impl SinkOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Performed { .. } => "performed",
            Self::AlreadyRecorded => "already_recorded",
            Self::AlreadyLinked => "already_linked",
            Self::AlreadyExists => "already_exists",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub sink: SinkId,
    pub outcome: SinkOutcome,
}

/// Terminal state of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Verifier is blacklisted; nothing was done.
    Skipped,
    /// Deletion; nothing to do besides advancing the checkpoint.
    CheckpointOnly,
    /// Every applicable sink reached a terminal state.
    Dispatched(Vec<SinkReport>),
    /// Shutdown was requested between sinks.
    Interrupted(Vec<SinkReport>),
}

impl EventOutcome {
    /// Whether the checkpoint may move past this event.
    ///
    /// Failed sinks do not hold the checkpoint back unless *every* sink
    /// failed, in which case nothing about the event completed.
    pub fn advances_checkpoint(&self) -> bool {
        match self {
            Self::Skipped | Self::CheckpointOnly => true,
            Self::Dispatched(reports) => {
                reports.is_empty() || reports.iter().any(|r| !r.outcome.is_failed())
            }
            Self::Interrupted(_) => false,
        }
    }

    pub fn reports(&self) -> &[SinkReport] {
        match self {
            Self::Dispatched(reports) | Self::Interrupted(reports) => reports,
            Self::Skipped | Self::CheckpointOnly => &[],
        }
    }

    pub fn performed(&self) -> usize {
        self.count(|o| matches!(o, SinkOutcome::Performed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(SinkOutcome::is_failed)
    }

    /// Sinks found already done by any means.
    pub fn already_done(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                SinkOutcome::AlreadyRecorded | SinkOutcome::AlreadyLinked | SinkOutcome::AlreadyExists
            )
        })
    }

    fn count(&self, pred: impl Fn(&SinkOutcome) -> bool) -> usize {
        self.reports().iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// One async lock per subject currently being fanned out.
#[derive(Default)]
struct SubjectLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubjectLocks {
    async fn acquire(&self, subject_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(subject_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct FanoutExecutor {
    social: Arc<dyn SocialClient>,
    oracle: Oracle,
    handles: HandleCache,
    ledger: Ledger,
    directory: Arc<VerifierDirectory>,
    rate: Arc<RateController>,
    settings: ExecutorSettings,
    notified: Mutex<HashSet<String>>,
    subjects: SubjectLocks,
}

impl FanoutExecutor {
    pub fn new(
        social: Arc<dyn SocialClient>,
        index: Arc<dyn LinkIndex>,
        ledger: Ledger,
        directory: Arc<VerifierDirectory>,
        rate: Arc<RateController>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            oracle: Oracle::new(index, settings.owner_did.clone()),
            handles: HandleCache::new(social.clone()),
            social,
            ledger,
            directory,
            rate,
            settings,
            notified: Mutex::new(HashSet::new()),
            subjects: SubjectLocks::default(),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn directory(&self) -> &VerifierDirectory {
        &self.directory
    }

    pub fn rate(&self) -> &Arc<RateController> {
        &self.rate
    }

    /// AT-URI of one of the owner's lists.
    pub fn list_uri(&self, rkey: &str) -> String {
        format!("at://{}/{}/{}", self.settings.owner_did, LIST_COLLECTION, rkey)
    }

    /// Sinks that apply to a created event, in execution order.
    pub fn sinks_for(&self, profile: Option<&VerifierProfile>) -> Vec<SinkId> {
        let mut sinks = Vec::new();
        if self.settings.announce {
            sinks.push(SinkId::Announcement);
        }
        sinks.push(SinkId::CatchAllList);
        for rkey in profile.map(|p| p.lists.as_slice()).unwrap_or_default() {
            let sink = SinkId::VerifierList(rkey.clone());
            if rkey != &self.settings.catch_all_list && !sinks.contains(&sink) {
                sinks.push(sink);
            }
        }
        sinks
    }

    /// Runs one event to a terminal state.
    pub async fn process(&self, event: &VerificationEvent, shutdown: &Shutdown) -> EventOutcome {
        if self.directory.is_blacklisted(&event.verifier_id) {
            tracing::info!(
                verifier = %event.verifier_id,
                subject = %event.subject_id,
                "skipping event from blacklisted verifier"
            );
            return EventOutcome::Skipped;
        }
        if event.kind == EventKind::Deleted {
            tracing::debug!(
                verifier = %event.verifier_id,
                rkey = ?event.record_key,
                "verification deleted, nothing to undo"
            );
            return EventOutcome::CheckpointOnly;
        }

        if let Some(handle) = &event.subject_handle {
            self.handles.remember(&event.subject_id, handle);
        }
        if let Err(e) = self
            .ledger
            .record_verification(&event.subject_id, &event.verifier_id, event.occurred_at)
            .await
        {
            tracing::warn!(subject = %event.subject_id, error = %e, "failed to log verification");
        }

        let profile = self.directory.profile(&event.verifier_id);
        if profile.is_none() {
            self.report_configuration_gap(event).await;
        }

        // Concurrent backfill workers may carry the same subject under
        // different verifiers; their shared sinks must not race.
        let _subject = self.subjects.acquire(&event.subject_id).await;

        let sinks = self.sinks_for(profile);
        let mut reports = Vec::with_capacity(sinks.len());
        let mut linked = HashMap::new();

        for sink in &sinks {
            if shutdown.is_triggered() {
                tracing::warn!(
                    subject = %event.subject_id,
                    verifier = %event.verifier_id,
                    completed = reports.len(),
                    remaining = sinks.len() - reports.len(),
                    "shutdown requested mid fan-out, event left unfinished"
                );
                return EventOutcome::Interrupted(reports);
            }

            let outcome = self.dispatch(event, profile, sink, &mut linked).await;
            match &outcome {
                SinkOutcome::Performed { external_ref } => tracing::info!(
                    subject = %event.subject_id,
                    verifier = %event.verifier_id,
                    sink = %sink,
                    uri = %external_ref,
                    "effect performed"
                ),
                SinkOutcome::Failed { reason } => tracing::warn!(
                    subject = %event.subject_id,
                    verifier = %event.verifier_id,
                    sink = %sink,
                    reason = %reason,
                    "effect failed"
                ),
                other => tracing::debug!(
                    subject = %event.subject_id,
                    verifier = %event.verifier_id,
                    sink = %sink,
                    outcome = other.label(),
                    "effect already done"
                ),
            }
            reports.push(SinkReport {
                sink: sink.clone(),
                outcome,
            });
        }

        EventOutcome::Dispatched(reports)
    }

    async fn dispatch(
        &self,
        event: &VerificationEvent,
        profile: Option<&VerifierProfile>,
        sink: &SinkId,
        linked: &mut HashMap<LinkQuery, bool>,
    ) -> SinkOutcome {
        let key = EffectKey::for_event(event, sink.clone());
        match self.ledger.has_effect(&key).await {
            Ok(true) => return SinkOutcome::AlreadyRecorded,
            Ok(false) => {}
            Err(e) => {
                return SinkOutcome::Failed {
                    reason: format!("ledger unavailable: {e}"),
                }
            }
        }

        let recorded = match self.ledger.sinks_for_subject(&event.subject_id).await {
            Ok(recorded) => recorded,
            Err(e) => {
                return SinkOutcome::Failed {
                    reason: format!("ledger unavailable: {e}"),
                }
            }
        };
        // List membership belongs to the subject: another verifier's row for
        // the same list means the subject is already on it.
        if sink.is_list() && recorded.contains(sink) {
            return SinkOutcome::AlreadyRecorded;
        }

        // The index answers per (subject, collection, path). A hit that our
        // own rows of the same kind account for says nothing about this sink.
        let query = LinkQuery::for_sink(sink);
        if !recorded.iter().any(|s| LinkQuery::for_sink(s) == query) {
            let already = match linked.get(&query) {
                Some(answer) => *answer,
                None => {
                    let answer = self.oracle.already_linked(&event.subject_id, &query).await;
                    linked.insert(query, answer);
                    answer
                }
            };
            if already {
                return SinkOutcome::AlreadyLinked;
            }
        }

        self.rate.throttle(CallClass::Sink).await;
        let result = match sink {
            SinkId::Announcement => {
                let text = self.announcement_text(event, profile).await;
                self.social.create_post(&text).await
            }
            SinkId::CatchAllList => {
                let list = self.list_uri(&self.settings.catch_all_list);
                self.social.add_list_member(&list, &event.subject_id).await
            }
            SinkId::VerifierList(rkey) => {
                let list = self.list_uri(rkey);
                self.social.add_list_member(&list, &event.subject_id).await
            }
        };

        match result {
            Ok(external_ref) => {
                let record = EffectRecord {
                    key,
                    external_ref: external_ref.clone(),
                    performed_at: event.occurred_at,
                };
                match self.ledger.record_effect(record).await {
                    Ok(()) => SinkOutcome::Performed { external_ref },
                    Err(e) if e.is_conflict() => SinkOutcome::AlreadyRecorded,
                    Err(e) => {
                        tracing::error!(
                            subject = %event.subject_id,
                            sink = %sink,
                            uri = %external_ref,
                            error = %e,
                            "effect performed but not recorded in ledger"
                        );
                        SinkOutcome::Performed { external_ref }
                    }
                }
            }
            Err(EffectError::AlreadyExists(_)) => SinkOutcome::AlreadyExists,
            Err(e) => SinkOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    async fn announcement_text(
        &self,
        event: &VerificationEvent,
        profile: Option<&VerifierProfile>,
    ) -> RichText {
        let subject_handle = match self.handles.resolve(&event.subject_id).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(subject = %event.subject_id, error = %e, "could not resolve subject handle");
                event.subject_id.clone()
            }
        };

        let verifier_label = match profile.and_then(messages::configured_label) {
            Some(label) => label,
            None => match self.handles.resolve(&event.verifier_id).await {
                Ok(handle) => format!("@{handle}"),
                Err(e) => {
                    tracing::warn!(verifier = %event.verifier_id, error = %e, "could not resolve verifier handle");
                    event.verifier_id.clone()
                }
            },
        };

        messages::announcement(&subject_handle, &event.subject_id, &verifier_label)
    }

    /// Notifies the operator once per unknown verifier per process lifetime.
    async fn report_configuration_gap(&self, event: &VerificationEvent) {
        let first_sighting = {
            let mut notified = self.notified.lock().unwrap_or_else(|p| p.into_inner());
            notified.insert(event.verifier_id.clone())
        };
        if !first_sighting {
            return;
        }

        tracing::warn!(
            verifier = %event.verifier_id,
            subject = %event.subject_id,
            "verifier has no configured lists, using the catch-all list only"
        );

        let Some(operator) = &self.settings.operator_did else {
            return;
        };
        let handle = self.handles.resolve(&event.verifier_id).await.ok();
        let text = messages::configuration_gap(&event.verifier_id, handle.as_deref(), &event.subject_id);

        self.rate.throttle(CallClass::Sink).await;
        if let Err(e) = self.social.send_direct_message(operator, &text).await {
            tracing::warn!(verifier = %event.verifier_id, error = %e, "failed to notify operator");
            let mut notified = self.notified.lock().unwrap_or_else(|p| p.into_inner());
            notified.remove(&event.verifier_id);
        }
    }
}
