//! Integration test: sled call store.
//!
//! Verifies that:
//! 1. A committed call can be read back with its transcript and history intact.
//! 2. The caller's phone is indexed so a second call is recognised as a repeat.
//! 3. Facts learned on a later call update the client entry.
//! 4. Re-committing the same call (a retry) stores nothing new.

use asya_core::{
    CallProfile, CallRecord, CallStats, CallStore, CityDirectory, Conversation, SledCallStore,
    Speaker,
};
use chrono::Utc;

fn record(call_id: &str, caller: &str, name: Option<&str>) -> CallRecord {
    let mut conv = Conversation::new("prompt");
    conv.record_client("Здравствуйте");
    conv.record_bot("Добрый день! Как вас зовут?");
    let mut profile = CallProfile::default();
    if let Some(name) = name {
        profile.set("name", name, &CityDirectory::default()).unwrap();
    }
    CallRecord {
        call_id: call_id.to_string(),
        caller_number: caller.to_string(),
        started_at: Utc::now(),
        ended_at: Utc::now(),
        profile,
        transcript: conv.transcript().to_vec(),
        history: conv.history().to_vec(),
        stats: CallStats {
            turns: 1,
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn commit_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = SledCallStore::open_path(dir.path()).unwrap();

    let record_id = store
        .commit_call(&record("c1", "89123456789", Some("Иван")))
        .await
        .expect("commit should succeed");

    let stored = store.get_call(&record_id).unwrap().expect("record should exist");
    assert_eq!(stored.record.call_id, "c1");
    assert_eq!(stored.record.transcript.len(), 2);
    assert_eq!(stored.record.transcript[0].speaker, Speaker::Client);
    assert_eq!(stored.record.history.len(), 3);
    assert_eq!(stored.record.profile.client_id.as_deref(), Some(stored.client_id.as_str()));
    assert_eq!(store.call_count(), 1);
}

#[tokio::test]
async fn second_call_finds_known_client() {
    let dir = tempfile::tempdir().unwrap();
    let store = SledCallStore::open_path(dir.path()).unwrap();

    assert!(store.find_client("+7 912 345-67-89").await.unwrap().is_none());

    store
        .commit_call(&record("c1", "89123456789", Some("Иван")))
        .await
        .unwrap();
    let client = store
        .find_client("9123456789")
        .await
        .unwrap()
        .expect("client should be indexed by normalised phone");
    assert_eq!(client.phone, "+79123456789");
    assert_eq!(client.name.as_deref(), Some("Иван"));
    assert_eq!(client.call_count, 1);

    store
        .commit_call(&record("c2", "+79123456789", Some("Иван Петрович")))
        .await
        .unwrap();
    let again = store.find_client("89123456789").await.unwrap().unwrap();
    assert_eq!(again.client_id, client.client_id, "same subscriber keeps its client id");
    assert_eq!(again.call_count, 2);
    assert_eq!(again.name.as_deref(), Some("Иван Петрович"));
    assert_eq!(store.call_count(), 2);
}

#[tokio::test]
async fn anonymous_caller_is_stored_without_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = SledCallStore::open_path(dir.path()).unwrap();

    let record_id = store
        .commit_call(&record("c3", "unknown", None))
        .await
        .unwrap();
    assert!(store.get_call(&record_id).unwrap().is_some());
    assert!(store.find_client("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn recommit_of_same_call_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = SledCallStore::open_path(dir.path()).unwrap();
    let rec = record("c1", "89123456789", Some("Иван"));

    let first = store.commit_call(&rec).await.unwrap();
    let second = store.commit_call(&rec).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.call_count(), 1);
    let client = store.find_client("89123456789").await.unwrap().unwrap();
    assert_eq!(client.call_count, 1);
}
