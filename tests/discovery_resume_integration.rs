//! End-to-end coverage for resuming batch-mode discovery after a kill
//! mid-issue: a session's cursor is advanced and committed per issue, so a
//! fresh process picking up a session by name should continue from the
//! next unprocessed issue rather than re-fetching what's already stored.

use std::sync::Arc;
use std::time::Duration;

use chron_harvester_core::discovery::BatchDiscovery;
use chron_harvester_core::rate_gate::RateGate;
use chron_harvester_core::shutdown::ShutdownSignal;
use chron_harvester_core::store::session::SessionUpdate;
use chron_harvester_core::store::Store;
use chron_harvester_core::{ArchiveClient, Database};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn discovery_for(server: &MockServer, store: Store) -> BatchDiscovery {
    let gate = Arc::new(RateGate::new(12, Duration::from_secs(3600)));
    let client = Arc::new(ArchiveClient::new(
        server.uri(),
        Arc::clone(&gate),
        Duration::from_secs(5),
        3,
        ShutdownSignal::new(),
    ));
    BatchDiscovery::new(client, gate, store, ShutdownSignal::new())
}

#[tokio::test]
async fn resuming_a_named_session_skips_issues_already_past_the_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/batches.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "batches": [{"name": "batch_a", "url": "/batches/batch_a.json", "page_count": 2}],
            "totalPages": 1
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/batches/batch_a.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "batch_a",
            "page_count": 2,
            "issues": [
                {"url": "/lccn/sn00000001/1900-01-01/ed-1.json", "date_issued": "1900-01-01"},
                {"url": "/lccn/sn00000001/1900-01-02/ed-1.json", "date_issued": "1900-01-02"}
            ]
        })))
        .mount(&server)
        .await;

    // Issue 0's endpoint is deliberately never mounted: resuming past it
    // must not re-fetch it. If it tried, the test fails with a connection
    // error instead of the assertions below.
    Mock::given(method("GET"))
        .and(path("/lccn/sn00000001/1900-01-02/ed-1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "date_issued": "1900-01-02",
            "pages": [{"url": "https://example/lccn/sn00000001/1900-01-02/ed-1/seq-1/", "sequence": 1}]
        })))
        .mount(&server)
        .await;

    let db = Database::new_in_memory().await.unwrap();
    let store = Store::new(db);

    // Simulate a process kill right after issue 0 committed: a session
    // already exists, parked at issue index 1 of batch 0.
    let session = store
        .sessions
        .create_discovery_session("interrupted-run", 1, true)
        .await
        .unwrap();
    store
        .sessions
        .update_discovery_session(
            session.id,
            &SessionUpdate {
                current_batch_index: Some(0),
                current_issue_index: Some(1),
                total_issues_in_batch: Some(2),
                delta_pages_discovered: 1,
                delta_pages_enqueued: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let discovery = discovery_for(&server, store.clone());
    discovery.run("interrupted-run", true).await.unwrap();

    let resumed = store.sessions.get_by_name("interrupted-run").await.unwrap().unwrap();
    assert_eq!(resumed.status, "completed");
    assert_eq!(resumed.current_issue_index, 2);
    // The pre-kill delta (1) plus issue 1's single page.
    assert_eq!(resumed.total_pages_discovered, 2);

    let pages = store.pages.list_by_lccn("sn00000001").await.unwrap();
    assert!(pages.iter().any(|p| p.date == "1900-01-02"));
}
