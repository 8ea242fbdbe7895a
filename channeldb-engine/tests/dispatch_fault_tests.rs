//! Write dispatch under injected substrate faults.
//!
//! Each test scripts a failure for one substrate operation and checks that
//! the dispatcher retries, deduplicates or gives up as appropriate, and that
//! the record ends in the matching lifecycle state.

use channeldb_engine::{Query, Strict};
use channeldb_test_utils::assertions::*;
use channeldb_test_utils::fixtures::*;
use channeldb_test_utils::{ChannelDbError, Fault, FieldValue, Op, SubstrateError};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_throttled_create_is_resent_once() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    substrate.inject(Op::CreateEntry, Fault::Throttle(Duration::from_millis(20)));

    let started = Instant::now();
    let peter = user("Peter", "foobar");
    db.save(&peter).await.unwrap().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_saved(&peter);
    assert_eq!(substrate.entries_in("user").len(), 1);
    // Throttled calls were never applied, so no token lookup happens.
    assert_eq!(substrate.calls(Op::CreateEntry), 2);
    assert_eq!(substrate.calls(Op::ListEntries), 0);

    let stats = db.stats();
    assert_eq!(stats.throttled, 1);
    assert_eq!(stats.dedup_hits, 0);
}

#[tokio::test]
async fn test_timeout_after_apply_does_not_duplicate() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    substrate.inject(Op::CreateEntry, Fault::TimeoutAfterApply);

    let peter = user("Peter", "foobar");
    db.save(&peter).await.unwrap().await.unwrap();

    let entries = substrate.entries_in("user");
    assert_eq!(entries.len(), 1);
    assert_eq!(peter.location(), Some(entries[0].entry));
    assert_eq!(substrate.calls(Op::CreateEntry), 1);
    assert_eq!(db.stats().dedup_hits, 1);
}

#[tokio::test]
async fn test_timeout_before_apply_is_resent() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    substrate.inject(Op::CreateEntry, Fault::TimeoutBeforeApply);

    let peter = user("Peter", "foobar");
    db.save(&peter).await.unwrap().await.unwrap();

    assert_eq!(substrate.entries_in("user").len(), 1);
    assert_eq!(substrate.calls(Op::CreateEntry), 2);
    assert_eq!(db.stats().dedup_hits, 0);
}

#[tokio::test]
async fn test_slow_call_hits_call_timeout() {
    let substrate = channeldb_test_utils::InMemorySubstrate::new();
    let mut config = fast_config();
    config.call_timeout = Duration::from_millis(50);
    let db = connected_database_on(&substrate, config, vec![user_schema()]).await;

    substrate.inject(Op::CreateEntry, Fault::Delay(Duration::from_millis(500)));
    let peter = user("Peter", "foobar");
    db.save(&peter).await.unwrap().await.unwrap();

    assert_eq!(substrate.entries_in("user").len(), 1);
    assert!(db.stats().timeouts >= 1);
}

#[tokio::test]
async fn test_cancelled_save_returns_record_to_unsaved() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    substrate.inject(Op::ReadMetadata, Fault::Delay(Duration::from_millis(200)));

    // Give up while the identity is still being allocated.
    let peter = user("Peter", "foobar");
    let cancelled = tokio::time::timeout(Duration::from_millis(20), db.save(&peter)).await;
    assert!(cancelled.is_err());
    db.drain().await;

    assert_unsaved(&peter);
    assert!(substrate.entries_in("user").is_empty());

    db.commit(&peter).await.unwrap().await.unwrap();
    assert_saved(&peter);
    assert_eq!(substrate.entries_in("user").len(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_leave_record_unsaved() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    substrate.inject_times(Op::CreateEntry, Fault::Throttle(Duration::from_millis(1)), 10);

    let peter = user("Peter", "foobar");
    let result = db.save(&peter).await.unwrap().await;

    assert_exhausted(&result);
    if let Err(ChannelDbError::Dispatch(channeldb_test_utils::DispatchError::Exhausted {
        attempts,
        ..
    })) = result
    {
        assert_eq!(attempts, fast_config().retry.max_retries + 1);
    }
    assert_unsaved(&peter);
    assert!(substrate.entries_in("user").is_empty());

    // The record can be saved once the substrate recovers.
    substrate.clear_faults();
    db.save(&peter).await.unwrap().await.unwrap();
    assert_saved(&peter);
}

#[tokio::test]
async fn test_rejected_write_is_not_retried() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    substrate.inject(Op::CreateEntry, Fault::Rejected);

    let peter = user("Peter", "foobar");
    let result = db.save(&peter).await.unwrap().await;

    assert!(matches!(
        result,
        Err(ChannelDbError::Substrate(SubstrateError::Rejected { .. }))
    ));
    assert_eq!(substrate.calls(Op::CreateEntry), 1);
    assert_unsaved(&peter);
}

#[tokio::test]
async fn test_transient_edit_is_retried() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    let mut peter = user("Peter", "foobar");
    db.save(&peter).await.unwrap().await.unwrap();

    substrate.inject_times(Op::EditEntry, Fault::Transient, 2);
    peter.set("password", "barfoo");
    db.update(&peter).await.unwrap().await.unwrap();

    let found = db
        .find_unique::<Strict>("user", &Query::all().filter("name", "Peter"))
        .await
        .unwrap();
    assert_eq!(found.get("password"), Some(&FieldValue::from("barfoo")));
    assert_eq!(substrate.calls(Op::EditEntry), 3);
}

#[tokio::test]
async fn test_delete_after_ambiguous_timeout_succeeds() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    let peter = user("Peter", "foobar");
    db.save(&peter).await.unwrap().await.unwrap();

    substrate.inject(Op::DeleteEntry, Fault::TimeoutAfterApply);
    db.delete(&peter).await.unwrap().await.unwrap();

    assert_unsaved(&peter);
    assert!(substrate.entries_in("user").is_empty());
}

#[tokio::test]
async fn test_failed_delete_restores_saved_state() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    let peter = user("Peter", "foobar");
    db.save(&peter).await.unwrap().await.unwrap();
    let id = assert_saved(&peter);

    substrate.inject(Op::DeleteEntry, Fault::Rejected);
    assert_err(&db.delete(&peter).await.unwrap().await);

    assert_eq!(assert_saved(&peter), id);
    assert_eq!(substrate.entries_in("user").len(), 1);
}

#[tokio::test]
async fn test_identity_allocation_retries_metadata_write() {
    let (substrate, db) = connected_database(vec![user_schema()]).await;
    substrate.inject(Op::WriteMetadata, Fault::TimeoutAfterApply);

    let first = user("Peter", "foobar");
    db.save(&first).await.unwrap().await.unwrap();
    let second = user("Anna", "pw");
    db.save(&second).await.unwrap().await.unwrap();

    assert_ne!(assert_saved(&first), assert_saved(&second));
}

#[tokio::test]
async fn test_materialize_creates_one_container_after_ambiguous_failure() {
    let substrate = channeldb_test_utils::InMemorySubstrate::new();
    substrate.inject(Op::CreateContainer, Fault::TimeoutAfterApply);

    let db = connected_database_on(&substrate, fast_config(), vec![user_schema()]).await;
    assert_eq!(substrate.containers_named("user"), 1);

    db.save(&user("Peter", "foobar")).await.unwrap().await.unwrap();
    assert_eq!(db.count("user", &Query::all()).await.unwrap(), 1);
}
