//! In-memory collaborators shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use verilist_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use verilist_engine::{
    Cursor, EffectError, EventSource, ExecutorSettings, FanoutExecutor, LinkIndex, Pacing,
    RateController, RecordLister, RecordPage, RemoteError, ShutdownTrigger, SocialClient,
    SourceError, SourcedEvent, VerifierDirectory,
};
use verilist_ledger::{CheckpointStore, Ledger};
use verilist_types::{LinkQuery, RichText, VerificationEvent, VerifierProfile};

pub const OWNER: &str = "did:plc:owner";
pub const OPERATOR: &str = "did:plc:operator";
pub const CATCH_ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Post(String),
    ListItem { list: String, subject: String },
    Profile(String),
    DirectMessage { recipient: String, text: String },
}

/// Records every call; failures are configured per list or for posts.
#[derive(Default)]
pub struct FakeSocial {
    pub calls: Mutex<Vec<Call>>,
    pub failing_lists: Mutex<HashSet<String>>,
    pub existing_lists: Mutex<HashSet<String>>,
    pub fail_posts: Mutex<bool>,
    pub handles: Mutex<HashMap<String, String>>,
    /// Fires after this many successful side effects.
    pub crash_after: Mutex<Option<(usize, ShutdownTrigger)>>,
    /// Index that learns about every link this account creates.
    pub index: Mutex<Option<Arc<FakeIndex>>>,
    fail_next: Mutex<usize>,
    successes: Mutex<usize>,
}

impl FakeSocial {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Side-effecting calls only (posts and list items).
    pub fn effect_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Post(_) | Call::ListItem { .. }))
            .collect()
    }

    pub fn fail_list(&self, list_uri: &str) {
        self.failing_lists.lock().unwrap().insert(list_uri.to_string());
    }

    pub fn list_already_has(&self, list_uri: &str) {
        self.existing_lists.lock().unwrap().insert(list_uri.to_string());
    }

    pub fn set_handle(&self, did: &str, handle: &str) {
        self.handles.lock().unwrap().insert(did.to_string(), handle.to_string());
    }

    pub fn crash_after(&self, successes: usize, trigger: ShutdownTrigger) {
        *self.crash_after.lock().unwrap() = Some((successes, trigger));
    }

    /// Fails the next `n` side effects, whatever their kind.
    pub fn fail_next(&self, n: usize) {
        *self.fail_next.lock().unwrap() = n;
    }

    fn take_failure(&self) -> bool {
        let mut remaining = self.fail_next.lock().unwrap();
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }

    fn reflect(&self, target: &str, query: LinkQuery) {
        if let Some(index) = self.index.lock().unwrap().as_ref() {
            index.owner_links(target, &query);
        }
    }

    fn succeeded(&self) {
        let mut successes = self.successes.lock().unwrap();
        *successes += 1;
        if let Some((limit, trigger)) = self.crash_after.lock().unwrap().as_ref() {
            if *successes >= *limit {
                trigger.trigger();
            }
        }
    }
}

#[async_trait]
impl SocialClient for FakeSocial {
    async fn create_post(&self, text: &RichText) -> Result<String, EffectError> {
        let (rendered, _) = text.render();
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::Post(rendered));
            calls.len()
        };
        if *self.fail_posts.lock().unwrap() || self.take_failure() {
            return Err(EffectError::Transport("connection reset".into()));
        }
        for span in text.render().1 {
            self.reflect(&span.did, LinkQuery::post_mentions());
        }
        self.succeeded();
        Ok(format!("at://{OWNER}/app.bsky.feed.post/{n}"))
    }

    async fn add_list_member(&self, list_uri: &str, subject_id: &str) -> Result<String, EffectError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::ListItem {
                list: list_uri.to_string(),
                subject: subject_id.to_string(),
            });
            calls.len()
        };
        if self.failing_lists.lock().unwrap().contains(list_uri) || self.take_failure() {
            return Err(EffectError::Rejected {
                status: 502,
                message: "UpstreamFailure".into(),
            });
        }
        if self.existing_lists.lock().unwrap().contains(list_uri) {
            return Err(EffectError::AlreadyExists(list_uri.to_string()));
        }
        self.reflect(subject_id, LinkQuery::list_items());
        self.succeeded();
        Ok(format!("at://{OWNER}/app.bsky.graph.listitem/{n}"))
    }

    async fn get_handle(&self, did: &str) -> Result<String, EffectError> {
        self.calls.lock().unwrap().push(Call::Profile(did.to_string()));
        self.handles
            .lock()
            .unwrap()
            .get(did)
            .cloned()
            .ok_or_else(|| EffectError::Rejected {
                status: 400,
                message: "profile not found".into(),
            })
    }

    async fn send_direct_message(&self, recipient: &str, text: &str) -> Result<(), EffectError> {
        self.calls.lock().unwrap().push(Call::DirectMessage {
            recipient: recipient.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Answers from a fixed set of `(target, collection)` pairs the owner links.
#[derive(Default)]
pub struct FakeIndex {
    pub linked: Mutex<HashSet<(String, String)>>,
    pub failing: Mutex<bool>,
    pub queries: Mutex<usize>,
}

impl FakeIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn owner_links(&self, target: &str, query: &LinkQuery) {
        self.linked
            .lock()
            .unwrap()
            .insert((target.to_string(), query.collection.clone()));
    }

    pub fn queries(&self) -> usize {
        *self.queries.lock().unwrap()
    }
}

#[async_trait]
impl LinkIndex for FakeIndex {
    async fn distinct_linking_dids(
        &self,
        target: &str,
        query: &LinkQuery,
        from_did: Option<&str>,
    ) -> Result<Vec<String>, RemoteError> {
        *self.queries.lock().unwrap() += 1;
        if *self.failing.lock().unwrap() {
            return Err(RemoteError::Status(503));
        }
        let linked = self
            .linked
            .lock()
            .unwrap()
            .contains(&(target.to_string(), query.collection.clone()));
        Ok(match (linked, from_did) {
            (true, Some(did)) => vec![did.to_string()],
            _ => vec![],
        })
    }
}

/// Serves pre-baked pages in order and remembers the cursors it was asked for.
#[derive(Default)]
pub struct FakeLister {
    pub pages: Mutex<HashMap<String, VecDeque<Result<RecordPage, RemoteError>>>>,
    pub requests: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeLister {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_page(&self, repo: &str, page: Result<RecordPage, RemoteError>) {
        self.pages
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default()
            .push_back(page);
    }

    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordLister for FakeLister {
    async fn list_records(
        &self,
        repo: &str,
        _collection: &str,
        _limit: u32,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RemoteError> {
        self.requests
            .lock()
            .unwrap()
            .push((repo.to_string(), cursor.map(str::to_string)));
        self.pages
            .lock()
            .unwrap()
            .get_mut(repo)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(RecordPage::default()))
    }
}

/// A finite stream source over a fixed list of events.
pub struct VecSource(pub VecDeque<SourcedEvent>);

impl VecSource {
    pub fn new(events: Vec<VerificationEvent>) -> Self {
        Self(
            events
                .into_iter()
                .map(|event| SourcedEvent {
                    cursor: Cursor::Stream(event.sequence.expect("stream events carry a sequence")),
                    event,
                })
                .collect(),
        )
    }
}

#[async_trait]
impl EventSource for VecSource {
    async fn next_event(&mut self) -> Result<Option<SourcedEvent>, SourceError> {
        Ok(self.0.pop_front())
    }
}

pub fn page(records: &[(&str, &str)], cursor: Option<&str>) -> RecordPage {
    let body = serde_json::json!({
        "records": records.iter().map(|(rkey, subject)| serde_json::json!({
            "uri": format!("at://did:plc:verifier/app.bsky.graph.verification/{rkey}"),
            "cid": "bafy",
            "value": {
                "$type": "app.bsky.graph.verification",
                "subject": subject,
                "handle": format!("{rkey}.test"),
                "displayName": rkey,
                "createdAt": "2025-04-21T18:00:00.000Z"
            }
        })).collect::<Vec<_>>(),
        "cursor": cursor,
    });
    serde_json::from_value(body).expect("page fixture should decode")
}

pub fn temp_pool(dir: &tempfile::TempDir) -> DbPool {
    let path = dir.path().join("verilist.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();
    pool
}

pub fn profile(did: &str, name: &str, lists: &[&str]) -> VerifierProfile {
    VerifierProfile {
        did: did.to_string(),
        name: Some(name.to_string()),
        handle: None,
        lists: lists.iter().map(|l| l.to_string()).collect(),
        blacklisted: false,
    }
}

pub fn event(subject: &str, verifier: &str, sequence: i64) -> VerificationEvent {
    let mut event =
        VerificationEvent::created(subject, verifier, Utc.with_ymd_and_hms(2025, 4, 21, 18, 0, 0).unwrap())
            .with_sequence(sequence);
    let short = subject.rsplit(':').next().unwrap_or(subject);
    event.subject_handle = Some(format!("{short}.test"));
    event
}

pub fn list_uri(rkey: &str) -> String {
    format!("at://{OWNER}/app.bsky.graph.list/{rkey}")
}

pub struct Harness {
    pub social: Arc<FakeSocial>,
    pub index: Arc<FakeIndex>,
    pub ledger: Ledger,
    pub checkpoint: CheckpointStore,
    pub executor: FanoutExecutor,
}

pub fn harness(
    pool: DbPool,
    profiles: Vec<VerifierProfile>,
    blacklist: Vec<String>,
) -> Harness {
    harness_with(pool, profiles, blacklist, FakeSocial::new(), FakeIndex::new())
}

pub fn harness_with(
    pool: DbPool,
    profiles: Vec<VerifierProfile>,
    blacklist: Vec<String>,
    social: Arc<FakeSocial>,
    index: Arc<FakeIndex>,
) -> Harness {
    *social.index.lock().unwrap() = Some(index.clone());
    let ledger = Ledger::new(pool.clone());
    let executor = FanoutExecutor::new(
        social.clone(),
        index.clone(),
        ledger.clone(),
        Arc::new(VerifierDirectory::new(profiles, blacklist)),
        Arc::new(RateController::new(Pacing::none())),
        ExecutorSettings {
            owner_did: OWNER.to_string(),
            catch_all_list: CATCH_ALL.to_string(),
            announce: true,
            operator_did: Some(OPERATOR.to_string()),
        },
    );
    Harness {
        social,
        index,
        ledger,
        checkpoint: CheckpointStore::new(pool, "jetstream"),
        executor,
    }
}
