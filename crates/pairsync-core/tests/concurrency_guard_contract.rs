//! Contract Test: One Pass Per Service
//!
//! This test verifies that overlapping passes for the same service cannot
//! both act on the same snapshot.
//!
//! Constraints verified:
//! - A pass started while another is in flight is rejected with PassInProgress
//! - The in-flight pass still completes, creating each counterpart once
//! - Engines sharing a lock set exclude each other; other services are independent
//!
//! If this test fails, concurrent passes can double-create counterparts.

mod common;

use common::*;
use pairsync_core::engine::{PassOutcome, ServiceLocks};
use pairsync_core::{EngineConfig, Error};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::test]
async fn overlapping_pass_is_rejected_and_nothing_is_created_twice() {
    let fx = Fixture {
        primary: TestStore::initializing("primary"),
        secondary: TestStore::new("secondary"),
        pairings: TestPairingTable::new(),
    };
    fx.primary.seed("p1", 100, json!({ "name": "Acme" })).await;

    let (engine, _events) = fx.engine_with(EngineConfig {
        ready_timeout_secs: 10,
        ..fast_settings()
    });
    let engine = Arc::new(engine);

    // First pass claims the service, then blocks on readiness
    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.reconcile().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = engine.reconcile().await;
    assert!(
        matches!(second, Err(Error::PassInProgress(ref name)) if name == SERVICE),
        "expected PassInProgress, got {:?}",
        second
    );

    fx.primary.inner().mark_ready();
    let report = first.await.unwrap().expect("first pass completes");
    assert_eq!(report.outcome(), PassOutcome::Complete);

    assert_eq!(fx.secondary.creates(), 1);
    assert_eq!(fx.secondary.len().await, 1);
    assert_eq!(fx.pairings.rows().await.len(), 1);

    // The lock is released with the pass
    let again = engine.reconcile().await.unwrap();
    assert_eq!(again.record_mutations(), 0);
}

#[tokio::test]
async fn engines_sharing_locks_exclude_each_other() {
    let fx = Fixture::new();
    let locks = Arc::new(ServiceLocks::new());

    let (a, _) = fx.engine();
    let a = a.with_locks(Arc::clone(&locks));
    let (b, _) = fx.engine();
    let b = b.with_locks(Arc::clone(&locks));

    let guard = locks.try_acquire(SERVICE).unwrap();
    assert!(matches!(a.reconcile().await, Err(Error::PassInProgress(_))));
    assert!(matches!(b.reconcile().await, Err(Error::PassInProgress(_))));
    drop(guard);

    assert!(a.reconcile().await.is_ok());
    assert!(!locks.is_active(SERVICE));
}

#[tokio::test]
async fn rejected_pass_touches_nothing() {
    let fx = Fixture::new();
    fx.primary.seed("p1", 100, json!({ "name": "Acme" })).await;
    let locks = Arc::new(ServiceLocks::new());

    let (engine, _) = fx.engine();
    let engine = engine.with_locks(Arc::clone(&locks));

    let _guard = locks.try_acquire(SERVICE).unwrap();
    let _ = engine.reconcile().await;

    assert_eq!(fx.primary.lists(), 0);
    assert_eq!(fx.mutations(), 0);
}
