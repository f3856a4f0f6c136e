//! ---
//! hma_section: "15-testing-qa-runbook"
//! hma_subsection: "integration-tests"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Integration and validation tests for the HM-Auto stack."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::sync::Arc;

use futures::future::join_all;
use hmauto_common::{StoreBackend, StoreConfig};
use hmauto_msg::TopicBus;
use hmauto_state::{open_store, FileStateStore, StateService, StateStore};
use tempfile::tempdir;

#[tokio::test]
async fn concurrent_writes_to_one_key_serialise_and_persist() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("states.json");
    let store = open_store(&StoreConfig {
        backend: StoreBackend::File,
        path: path.clone(),
    })
    .await
    .unwrap();

    let bus = TopicBus::new(64);
    let mut changes = bus.subscribe("hmstt_channel.hmstt.switch.server_1");
    let service = StateService::new(store, Arc::new(bus.clone()), "hmstt_channel");

    let writes = (0..12).map(|i| {
        let service = service.clone();
        let value = if i % 2 == 0 { "on" } else { "off" };
        async move { service.set_state("switch", "server_1", value).await }
    });
    let mut committed: Vec<_> = join_all(writes)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    committed.sort_by_key(|state| state.updated_at);
    assert!(committed
        .windows(2)
        .all(|pair| pair[0].updated_at < pair[1].updated_at));

    let mut announced = Vec::new();
    for _ in 0..12 {
        announced.push(changes.recv().await.unwrap().body);
    }
    let in_commit_order: Vec<_> = committed.iter().map(|state| state.value.clone()).collect();
    assert_eq!(announced, in_commit_order);

    let last = committed.last().unwrap().clone();
    assert_eq!(
        service.get_state_detail("switch", "server_1").await.unwrap(),
        last
    );

    let reopened = FileStateStore::open(&path).await.unwrap();
    let stored = reopened.get("hmstt.switch.server_1").await.unwrap().unwrap();
    assert_eq!(stored.value, last.value);
    assert_eq!(stored.updated_at, last.updated_at);
}

#[tokio::test]
async fn distinct_keys_are_listed_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("states.json");
    let store = Arc::new(FileStateStore::open(&path).await.unwrap());
    let service = StateService::new(store, Arc::new(TopicBus::new(8)), "hmstt_channel");

    service.set_state("switch", "server_1", "on").await.unwrap();
    service.set_state("switch", "garage_light", "off").await.unwrap();

    let reopened = FileStateStore::open(&path).await.unwrap();
    let keys: Vec<_> = reopened
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|state| state.namespace_key)
        .collect();
    assert_eq!(
        keys,
        vec!["hmstt.switch.garage_light", "hmstt.switch.server_1"]
    );
}
