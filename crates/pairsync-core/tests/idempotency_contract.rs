//! Contract Test: Idempotency
//!
//! This test verifies that a pass over already-reconciled data is a no-op.
//!
//! Constraints verified:
//! - A second pass with no external edits issues zero create/update/delete calls
//! - The pairing table carries reconciliation across engine restarts
//! - Repeated passes never duplicate counterparts
//!
//! If this test fails, every scheduled pass is rewriting data.

mod common;

use common::*;
use pairsync_core::engine::PassOutcome;
use pairsync_core::state::{FilePairingTable, FileStore};
use pairsync_core::traits::{Document, PairingTable, Store};
use pairsync_core::{EngineConfig, Reconciler};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn second_pass_issues_no_mutations() {
    let fx = Fixture::new();
    fx.primary.seed("p1", 100, json!({ "name": "Acme" })).await;
    fx.primary.seed("p2", 200, json!({ "name": "Globex" })).await;
    fx.secondary.seed("s9", 300, json!({ "name": "Initech" })).await;

    let (engine, _events) = fx.engine();

    let first = engine.reconcile().await.expect("first pass runs");
    assert_eq!(first.outcome(), PassOutcome::Complete);
    assert_eq!(first.created_in_secondary, 2);
    assert_eq!(first.created_in_primary, 1);

    let mutations_after_first = fx.mutations();
    let touches_after_first = fx.pairings.touches();

    let second = engine.reconcile().await.expect("second pass runs");
    assert_eq!(second.outcome(), PassOutcome::Complete);
    assert_eq!(second.record_mutations(), 0);
    assert_eq!(second.unchanged, 3);

    assert_eq!(
        fx.mutations(),
        mutations_after_first,
        "second pass must not create, update or delete anything"
    );
    assert_eq!(fx.pairings.touches(), touches_after_first);
}

#[tokio::test]
async fn many_passes_keep_one_counterpart_per_record() {
    let fx = Fixture::new();
    fx.primary.seed("p1", 100, json!({ "name": "Acme" })).await;

    let (engine, _events) = fx.engine();
    for _ in 0..5 {
        engine.reconcile().await.expect("pass runs");
    }

    assert_eq!(fx.secondary.len().await, 1);
    assert_eq!(fx.primary.len().await, 1);
    assert_eq!(fx.pairings.rows().await.len(), 1);
    assert_eq!(fx.secondary.creates(), 1);
}

#[tokio::test]
async fn restart_with_file_backends_does_not_duplicate() {
    // First "run" pairs everything and persists; the second run must agree
    let dir = tempfile::tempdir().unwrap();
    let primary_path = dir.path().join("primary.json");
    let secondary_path = dir.path().join("secondary.json");
    let pairing_path = dir.path().join("pairings.json");

    {
        let primary: FileStore<Document> = FileStore::open("primary", &primary_path).await.unwrap();
        primary.create(&doc(json!({ "name": "Acme" }))).await.unwrap();
        let secondary: FileStore<Document> =
            FileStore::open("secondary", &secondary_path).await.unwrap();
        let pairings = FilePairingTable::open(&pairing_path).await.unwrap();

        let (engine, _events) = Reconciler::new(
            SERVICE,
            Arc::new(primary),
            Arc::new(secondary),
            Arc::new(pairings),
            EngineConfig::default(),
        )
        .unwrap();

        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.created_in_secondary, 1);
    }

    // Second "run": fresh instances over the same files
    let primary: FileStore<Document> = FileStore::open("primary", &primary_path).await.unwrap();
    let secondary: FileStore<Document> = FileStore::open("secondary", &secondary_path).await.unwrap();
    let pairings = FilePairingTable::open(&pairing_path).await.unwrap();
    assert_eq!(pairings.list(SERVICE).await.unwrap().len(), 1);

    let secondary = Arc::new(secondary);
    let (engine, _events) = Reconciler::new(
        SERVICE,
        Arc::new(primary),
        secondary.clone(),
        Arc::new(pairings),
        EngineConfig::default(),
    )
    .unwrap();

    let report = engine.reconcile().await.unwrap();
    assert_eq!(report.record_mutations(), 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(secondary.list().await.unwrap().len(), 1);
}
