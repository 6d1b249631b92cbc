//! Contract Test: Conflict Resolution
//!
//! This test verifies last-write-wins between paired records.
//!
//! Constraints verified:
//! - The strictly newer side's data is pushed to the other side only
//! - The pairing watermark advances after every resolution
//! - Pairs not edited since the watermark are left alone
//! - Ties follow the configured tie-break
//!
//! If this test fails, edits are lost or bounce between the two sides.

mod common;

use common::*;
use pairsync_core::engine::{EngineEvent, Side};
use pairsync_core::traits::now_millis;
use pairsync_core::{EngineConfig, TieBreak};
use serde_json::json;

const T0: i64 = 1_000;
const T2: i64 = 2_000;
const T1: i64 = 3_000;

#[tokio::test]
async fn newer_primary_overwrites_secondary() {
    // Pairing at T0, Primary edited at T1, Secondary at T2, T0 < T2 < T1
    let fx = Fixture::new();
    fx.pairings.seed("row-1", "p1", "s1", T0).await;
    fx.primary.seed("p1", T1, json!({ "name": "Acme", "amount": 500 })).await;
    fx.secondary.seed("s1", T2, json!({ "name": "Acme", "amount": 300 })).await;

    let (engine, mut events) = fx.engine();
    let before = now_millis();
    let report = engine.reconcile().await.unwrap();

    assert_eq!(report.updated_in_secondary, 1);
    assert_eq!(report.updated_in_primary, 0);

    let secondary = fx.secondary.get("s1").await.unwrap();
    assert_eq!(secondary.data["amount"], 500);

    let primary = fx.primary.get("p1").await.unwrap();
    assert_eq!(primary.updated_at, T1, "Primary is left untouched");
    assert_eq!(fx.primary.updates(), 0);

    let row = fx.pairings.inner().get("row-1").await.unwrap();
    assert!(row.updated_at >= before, "watermark advances to the pass time");
    assert!(row.links("p1", "s1"));

    let events = drain(&mut events);
    assert!(events.contains(&EngineEvent::ConflictResolved {
        winner: Side::Primary,
        primary_id: "p1".into(),
        secondary_id: "s1".into(),
    }));
}

#[tokio::test]
async fn newer_secondary_overwrites_primary() {
    let fx = Fixture::new();
    fx.pairings.seed("row-1", "p1", "s1", T0).await;
    fx.primary.seed("p1", T2, json!({ "name": "Acme" })).await;
    fx.secondary.seed("s1", T1, json!({ "name": "Acme Corp" })).await;

    let (engine, _events) = fx.engine();
    let report = engine.reconcile().await.unwrap();

    assert_eq!(report.updated_in_primary, 1);
    assert_eq!(report.updated_in_secondary, 0);
    assert_eq!(fx.primary.get("p1").await.unwrap().data["name"], "Acme Corp");
    assert_eq!(fx.secondary.updates(), 0);
}

#[tokio::test]
async fn watermark_newer_than_both_sides_is_a_no_op() {
    let fx = Fixture::new();
    fx.pairings.seed("row-1", "p1", "s1", T1).await;
    fx.primary.seed("p1", T0, json!({ "name": "Acme" })).await;
    fx.secondary.seed("s1", T2, json!({ "name": "Different" })).await;

    let (engine, _events) = fx.engine();
    let report = engine.reconcile().await.unwrap();

    assert_eq!(report.unchanged, 1);
    assert_eq!(fx.mutations(), 0);
    assert_eq!(fx.pairings.touches(), 0);
    assert_eq!(fx.pairings.inner().get("row-1").await.unwrap().updated_at, T1);
}

#[tokio::test]
async fn edit_at_exactly_the_watermark_is_already_reconciled() {
    let fx = Fixture::new();
    fx.pairings.seed("row-1", "p1", "s1", T1).await;
    fx.primary.seed("p1", T1, json!({ "name": "Acme" })).await;
    fx.secondary.seed("s1", T1, json!({ "name": "Acme" })).await;

    let (engine, _events) = fx.engine();
    let report = engine.reconcile().await.unwrap();

    assert_eq!(report.unchanged, 1);
    assert_eq!(fx.mutations(), 0);
}

#[tokio::test]
async fn tie_defaults_to_secondary_winning() {
    let fx = Fixture::new();
    fx.pairings.seed("row-1", "p1", "s1", T0).await;
    fx.primary.seed("p1", T1, json!({ "name": "from primary" })).await;
    fx.secondary.seed("s1", T1, json!({ "name": "from secondary" })).await;

    let (engine, _events) = fx.engine();
    let report = engine.reconcile().await.unwrap();

    assert_eq!(report.updated_in_primary, 1);
    assert_eq!(fx.primary.get("p1").await.unwrap().data["name"], "from secondary");
    assert_eq!(fx.secondary.updates(), 0);
    assert_eq!(fx.pairings.touches(), 1);
}

#[tokio::test]
async fn tie_break_can_prefer_primary() {
    let fx = Fixture::new();
    fx.pairings.seed("row-1", "p1", "s1", T0).await;
    fx.primary.seed("p1", T1, json!({ "name": "from primary" })).await;
    fx.secondary.seed("s1", T1, json!({ "name": "from secondary" })).await;

    let (engine, _events) = fx.engine_with(EngineConfig {
        tie_break: TieBreak::PrimaryWins,
        ..fast_settings()
    });
    let report = engine.reconcile().await.unwrap();

    assert_eq!(report.updated_in_secondary, 1);
    assert_eq!(fx.secondary.get("s1").await.unwrap().data["name"], "from primary");
    assert_eq!(fx.primary.updates(), 0);
}

#[tokio::test]
async fn resolved_pair_is_stable_on_next_pass() {
    let fx = Fixture::new();
    fx.pairings.seed("row-1", "p1", "s1", T0).await;
    fx.primary.seed("p1", T1, json!({ "name": "Acme" })).await;
    fx.secondary.seed("s1", T2, json!({ "name": "Old" })).await;

    let (engine, _events) = fx.engine();
    engine.reconcile().await.unwrap();
    let after_first = fx.mutations();

    let report = engine.reconcile().await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(fx.mutations(), after_first);
    assert_eq!(fx.pairings.touches(), 1);
}

#[tokio::test]
async fn pair_is_resolved_once_even_though_both_scans_find_it() {
    let fx = Fixture::new();
    fx.pairings.seed("row-1", "p1", "s1", T0).await;
    fx.primary.seed("p1", T1, json!({ "name": "Acme" })).await;
    fx.secondary.seed("s1", T2, json!({ "name": "Old" })).await;

    let (engine, _events) = fx.engine();
    engine.reconcile().await.unwrap();

    assert_eq!(fx.secondary.updates(), 1);
    assert_eq!(fx.pairings.touches(), 1);
}
