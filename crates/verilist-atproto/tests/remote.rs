use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;
use verilist_atproto::{build_http_client, ConstellationIndex, PdsResolver, RepoLister};
use verilist_engine::{LinkIndex, RecordLister, RemoteError};
use verilist_types::{LinkQuery, VERIFICATION_COLLECTION};

#[tokio::test]
async fn link_index_queries_distinct_dids_from_owner() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/links/distinct-dids")
                .query_param("target", "did:plc:s1")
                .query_param("collection", "app.bsky.graph.listitem")
                .query_param("path", ".subject")
                .query_param("from_dids", "did:plc:owner")
                .header_exists("user-agent");
            then.status(200).json_body(json!({
                "total": 1,
                "linking_dids": ["did:plc:owner"],
                "cursor": null
            }));
        })
        .await;

    let index = ConstellationIndex::new(build_http_client(), &server.base_url()).unwrap();
    let dids = index
        .distinct_linking_dids("did:plc:s1", &LinkQuery::list_items(), Some("did:plc:owner"))
        .await
        .unwrap();

    assert_eq!(dids, vec!["did:plc:owner".to_string()]);
    mock.assert_async().await;
}

#[tokio::test]
async fn link_index_errors_carry_the_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/links/distinct-dids");
            then.status(503);
        })
        .await;

    let index = ConstellationIndex::new(build_http_client(), &server.base_url()).unwrap();
    let err = index
        .distinct_linking_dids("did:plc:s1", &LinkQuery::post_mentions(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Status(503)));
}

#[tokio::test]
async fn lister_resolves_pds_once_and_pages_through_it() {
    let plc = MockServer::start_async().await;
    let pds = MockServer::start_async().await;
    let document = plc
        .mock_async(|when, then| {
            when.method(GET).path("/did:plc:news");
            then.status(200).json_body(json!({
                "id": "did:plc:news",
                "service": [{
                    "id": "#atproto_pds",
                    "type": "AtprotoPersonalDataServer",
                    "serviceEndpoint": pds.base_url()
                }]
            }));
        })
        .await;
    // Registered first: the first-page mock below does not constrain the cursor.
    let second = pds
        .mock_async(|when, then| {
            when.method(GET)
                .path("/xrpc/com.atproto.repo.listRecords")
                .query_param("cursor", "3la");
            then.status(200).json_body(json!({ "records": [] }));
        })
        .await;
    let first = pds
        .mock_async(|when, then| {
            when.method(GET)
                .path("/xrpc/com.atproto.repo.listRecords")
                .query_param("repo", "did:plc:news")
                .query_param("collection", VERIFICATION_COLLECTION)
                .query_param("limit", "100");
            then.status(200).json_body(json!({
                "records": [{
                    "uri": "at://did:plc:news/app.bsky.graph.verification/3la",
                    "cid": "bafy",
                    "value": {
                        "$type": VERIFICATION_COLLECTION,
                        "subject": "did:plc:s1",
                        "handle": "s1.test",
                        "displayName": "S1",
                        "createdAt": "2025-04-21T18:00:00.000Z"
                    }
                }],
                "cursor": "3la"
            }));
        })
        .await;

    let http = build_http_client();
    let resolver = Arc::new(PdsResolver::new(http.clone(), plc.base_url(), "https://unused.example"));
    let lister = RepoLister::new(http, resolver);

    let page = lister
        .list_records("did:plc:news", VERIFICATION_COLLECTION, 100, None)
        .await
        .unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].value.subject, "did:plc:s1");
    assert_eq!(page.cursor.as_deref(), Some("3la"));

    let page = lister
        .list_records("did:plc:news", VERIFICATION_COLLECTION, 100, Some("3la"))
        .await
        .unwrap();
    assert!(page.records.is_empty());
    assert_eq!(page.cursor, None);

    assert_eq!(document.hits_async().await, 1);
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn resolver_falls_back_to_default_pds_without_caching() {
    let plc = MockServer::start_async().await;
    let missing = plc
        .mock_async(|when, then| {
            when.method(GET).path("/did:plc:gone");
            then.status(404);
        })
        .await;

    let resolver = PdsResolver::new(build_http_client(), plc.base_url(), "https://bsky.social");

    assert_eq!(resolver.resolve("did:plc:gone").await, "https://bsky.social");
    assert_eq!(resolver.resolve("did:plc:gone").await, "https://bsky.social");
    assert_eq!(missing.hits_async().await, 2);
}
