mod support;

use verilist_engine::{EventOutcome, Shutdown, SinkOutcome};
use verilist_types::{EventKind, LinkQuery, SinkId};

use support::*;

fn news() -> verilist_types::VerifierProfile {
    profile("did:plc:news", "Daily News", &["l1"])
}

#[tokio::test]
async fn first_delivery_performs_every_sink_once() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;

    assert_eq!(outcome.performed(), 3);
    assert_eq!(
        h.social.effect_calls(),
        vec![
            Call::Post("@s1.test has been verified by Daily News.".into()),
            Call::ListItem {
                list: list_uri(CATCH_ALL),
                subject: "did:plc:s1".into()
            },
            Call::ListItem {
                list: list_uri("l1"),
                subject: "did:plc:s1".into()
            },
        ]
    );
    let sinks: Vec<SinkId> = h
        .ledger
        .effects_for_subject("did:plc:s1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.key.sink)
        .collect();
    assert_eq!(sinks.len(), 3);
    assert!(sinks.contains(&SinkId::Announcement));
    assert!(sinks.contains(&SinkId::CatchAllList));
    assert!(sinks.contains(&SinkId::VerifierList("l1".into())));
}

#[tokio::test]
async fn duplicate_delivery_is_absorbed_by_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);
    let e = event("did:plc:s1", "did:plc:news", 1);

    h.executor.process(&e, &Shutdown::never()).await;
    let queries_after_first = h.index.queries();
    let second = h.executor.process(&e, &Shutdown::never()).await;

    assert_eq!(h.social.effect_calls().len(), 3);
    assert_eq!(second.performed(), 0);
    assert!(second
        .reports()
        .iter()
        .all(|r| r.outcome == SinkOutcome::AlreadyRecorded));
    // Ledger hits never reach the link index.
    assert_eq!(h.index.queries(), queries_after_first);
    assert_eq!(h.ledger.counts().await.unwrap().effects, 3);
}

#[tokio::test]
async fn owner_link_in_index_suppresses_list_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);
    h.index.owner_links("did:plc:s1", &LinkQuery::list_items());

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;

    let reports = outcome.reports();
    assert!(matches!(reports[0].outcome, SinkOutcome::Performed { .. }));
    assert_eq!(reports[1].outcome, SinkOutcome::AlreadyLinked);
    assert_eq!(reports[2].outcome, SinkOutcome::AlreadyLinked);
    assert_eq!(h.social.effect_calls().len(), 1);
    // Oracle hits leave no ledger row behind.
    assert_eq!(h.ledger.counts().await.unwrap().effects, 1);
}

#[tokio::test]
async fn link_index_outage_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);
    *h.index.failing.lock().unwrap() = true;

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;

    assert_eq!(outcome.performed(), 3);
}

#[tokio::test]
async fn one_failing_sink_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);
    h.social.fail_list(&list_uri(CATCH_ALL));

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;

    assert_eq!(outcome.performed(), 2);
    assert_eq!(outcome.failed(), 1);
    assert!(outcome.reports()[1].outcome.is_failed());
    assert!(outcome.advances_checkpoint());

    let recorded = h.ledger.effects_for_subject("did:plc:s1").await.unwrap();
    assert!(recorded.iter().all(|r| r.key.sink != SinkId::CatchAllList));

    // The next delivery retries only the failed sink.
    h.social.failing_lists.lock().unwrap().clear();
    let retry = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;
    assert_eq!(retry.performed(), 1);
    assert_eq!(retry.already_done(), 2);
}

#[tokio::test]
async fn every_sink_failing_holds_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);
    *h.social.fail_posts.lock().unwrap() = true;
    h.social.fail_list(&list_uri(CATCH_ALL));
    h.social.fail_list(&list_uri("l1"));

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;

    assert_eq!(outcome.failed(), 3);
    assert!(!outcome.advances_checkpoint());
}

#[tokio::test]
async fn collaborator_duplicate_is_not_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);
    h.social.list_already_has(&list_uri("l1"));

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;

    assert_eq!(outcome.reports()[2].outcome, SinkOutcome::AlreadyExists);
    assert_eq!(outcome.failed(), 0);
    assert_eq!(h.ledger.counts().await.unwrap().effects, 2);
}

#[tokio::test]
async fn blacklisted_verifier_is_skipped_entirely() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        temp_pool(&dir),
        vec![news()],
        vec!["did:plc:news".to_string()],
    );

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;

    assert_eq!(outcome, EventOutcome::Skipped);
    assert!(outcome.advances_checkpoint());
    assert!(h.social.calls().is_empty());
    assert_eq!(h.index.queries(), 0);
    let counts = h.ledger.counts().await.unwrap();
    assert_eq!((counts.effects, counts.verifications), (0, 0));
}

#[tokio::test]
async fn deletion_only_advances_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);
    let mut deleted = event("", "did:plc:news", 7);
    deleted.kind = EventKind::Deleted;

    let outcome = h.executor.process(&deleted, &Shutdown::never()).await;

    assert_eq!(outcome, EventOutcome::CheckpointOnly);
    assert!(h.social.calls().is_empty());
    assert_eq!(h.ledger.counts().await.unwrap().effects, 0);
}

#[tokio::test]
async fn unknown_verifier_gets_catch_all_and_one_operator_notice() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![], vec![]);
    h.social.set_handle("did:plc:newcomer", "newcomer.test");

    let first = h
        .executor
        .process(&event("did:plc:s1", "did:plc:newcomer", 1), &Shutdown::never())
        .await;
    h.executor
        .process(&event("did:plc:s2", "did:plc:newcomer", 2), &Shutdown::never())
        .await;

    let sinks: Vec<&SinkId> = first.reports().iter().map(|r| &r.sink).collect();
    assert_eq!(sinks, vec![&SinkId::Announcement, &SinkId::CatchAllList]);

    let notices: Vec<Call> = h
        .social
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::DirectMessage { .. }))
        .collect();
    assert_eq!(notices.len(), 1);
    let Call::DirectMessage { recipient, text } = &notices[0] else {
        unreachable!()
    };
    assert_eq!(recipient, OPERATOR);
    assert!(text.contains("@newcomer.test"));

    // Unconfigured verifiers are named by their resolved handle.
    assert!(h.social.effect_calls().contains(&Call::Post(
        "@s1.test has been verified by @newcomer.test.".into()
    )));
}

#[tokio::test]
async fn second_verifier_of_same_subject_gets_its_own_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        temp_pool(&dir),
        vec![news(), profile("did:plc:paper", "The Paper", &["l2"])],
        vec![],
    );

    h.executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &Shutdown::never())
        .await;
    // The index now shows the owner linking s1 by post and by list item.
    assert!(h.index.linked.lock().unwrap().len() >= 2);

    let calls_before = h.social.effect_calls().len();
    let second = h
        .executor
        .process(&event("did:plc:s1", "did:plc:paper", 2), &Shutdown::never())
        .await;

    let outcomes: Vec<(&SinkId, &SinkOutcome)> =
        second.reports().iter().map(|r| (&r.sink, &r.outcome)).collect();
    assert!(matches!(outcomes[0], (SinkId::Announcement, SinkOutcome::Performed { .. })));
    // Catch-all membership is per subject: already there via the first verifier.
    assert_eq!(outcomes[1], (&SinkId::CatchAllList, &SinkOutcome::AlreadyRecorded));
    assert!(matches!(outcomes[2], (SinkId::VerifierList(l), SinkOutcome::Performed { .. }) if l == "l2"));

    assert_eq!(
        h.social.effect_calls()[calls_before..].to_vec(),
        vec![
            Call::Post("@s1.test has been verified by The Paper.".into()),
            Call::ListItem {
                list: list_uri("l2"),
                subject: "did:plc:s1".into()
            },
        ]
    );
    assert_eq!(h.ledger.counts().await.unwrap().verifications, 2);
    assert_eq!(h.ledger.counts().await.unwrap().effects, 5);
}

#[tokio::test]
async fn index_hit_without_own_rows_still_suppresses_other_verifiers() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        temp_pool(&dir),
        vec![profile("did:plc:paper", "The Paper", &["l2"])],
        vec![],
    );
    // Links made before this ledger existed.
    h.index.owner_links("did:plc:s1", &LinkQuery::list_items());

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:paper", 1), &Shutdown::never())
        .await;

    assert_eq!(outcome.reports()[1].outcome, SinkOutcome::AlreadyLinked);
    assert_eq!(outcome.reports()[2].outcome, SinkOutcome::AlreadyLinked);
}

#[tokio::test]
async fn concurrent_events_for_one_subject_add_it_to_the_catch_all_once() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        temp_pool(&dir),
        vec![news(), profile("did:plc:paper", "The Paper", &["l2"])],
        vec![],
    );
    let from_news = event("did:plc:s1", "did:plc:news", 1);
    let from_paper = event("did:plc:s1", "did:plc:paper", 2);
    let never = Shutdown::never();

    let (a, b) = tokio::join!(
        h.executor.process(&from_news, &never),
        h.executor.process(&from_paper, &never),
    );

    assert_eq!(a.failed() + b.failed(), 0);
    let catch_all_adds = h
        .social
        .effect_calls()
        .into_iter()
        .filter(|c| matches!(c, Call::ListItem { list, .. } if *list == list_uri(CATCH_ALL)))
        .count();
    assert_eq!(catch_all_adds, 1);
}

#[tokio::test]
async fn shutdown_between_sinks_interrupts_the_event() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(temp_pool(&dir), vec![news()], vec![]);
    let (trigger, shutdown) = Shutdown::channel();
    h.social.crash_after(1, trigger);

    let outcome = h
        .executor
        .process(&event("did:plc:s1", "did:plc:news", 1), &shutdown)
        .await;

    let EventOutcome::Interrupted(reports) = &outcome else {
        panic!("expected interruption, got {outcome:?}");
    };
    assert_eq!(reports.len(), 1);
    assert!(!outcome.advances_checkpoint());
}
