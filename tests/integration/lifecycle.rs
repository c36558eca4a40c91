//! Multi-tick scenarios: capacity, stats consistency, restarts, outages.

use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use harvester::clock::ManualClock;
use harvester::config::EngineConfig;
use harvester::engine::Engine;
use harvester::storage::{JsonFileStore, MemoryStore, StateStore};
use harvester::types::ExitSource;

use crate::mock_source::{pool, MockSource};

fn config(max_open: usize) -> EngineConfig {
    EngineConfig {
        max_open_positions: max_open,
        ..EngineConfig::default()
    }
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn test_long_run_keeps_invariants() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(MockSource::with_pools(12, t0()));
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(config(5), source.clone(), store.clone(), clock.clone());
    assert_ok!(engine.initialize().await);

    for tick in 0..40 {
        source.set_drift(if tick % 3 == 0 { 1.02 } else { 0.99 });
        let report = assert_ok!(engine.run_tick().await);

        let open = engine.open_positions().await;
        let history = engine.history().await;
        let stats = engine.status().await.stats;

        assert!(open.len() <= 5, "tick {tick}: {} open", open.len());
        assert_eq!(report.open_after, open.len());

        let ids: HashSet<_> = open.iter().map(|p| p.opportunity_id.clone()).collect();
        assert_eq!(ids.len(), open.len(), "duplicate open position");

        assert_eq!(stats.total_settled as usize, history.len());
        assert_eq!(stats.profitable_count + stats.loss_count, stats.total_settled);
        assert_eq!(stats.total_opened as usize, open.len() + history.len());
        assert!(history.iter().all(|p| !p.is_open()));
        assert!(open.iter().all(|p| p.is_open()));

        clock.advance_hours(6);
    }

    let stats = engine.status().await.stats;
    assert!(stats.total_settled > 0);
    let realized: f64 = engine
        .history()
        .await
        .iter()
        .filter_map(|p| p.settlement())
        .map(|s| s.realized_pnl)
        .sum();
    assert!((stats.net_pnl() - realized).abs() < 1e-6);
    assert!(store.save_count() > 0);
}

#[tokio::test]
async fn test_positions_rotate_after_hold_period() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(MockSource::with_pools(2, t0()));
    let engine = Engine::new(config(10), source.clone(), Arc::new(MemoryStore::new()), clock.clone());

    let first = assert_ok!(engine.run_tick().await);
    assert_eq!(first.opened.len(), 2);

    clock.advance_hours(24);
    let mid = assert_ok!(engine.run_tick().await);
    assert!(mid.settled.is_empty());
    assert!(mid.opened.is_empty());
    assert_eq!(mid.rejections.get("already_open"), Some(&2));

    // Yields up 10% since entry; both settle at a profit and re-enter.
    source.set_drift(1.10);
    clock.advance_hours(25);
    let exit = assert_ok!(engine.run_tick().await);
    assert_eq!(exit.settled.len(), 2);
    assert_eq!(exit.opened.len(), 2);
    assert!(exit.realized_pnl() > 0.0);

    let stats = engine.status().await.stats;
    assert_eq!(stats.profitable_count, 2);
    assert_eq!(stats.total_opened, 4);
    assert!((stats.avg_hold_hours - 49.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_delisted_pool_settles_at_entry_values() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(MockSource::new(vec![
        pool("stays", 0.40, t0()),
        pool("leaves", 0.50, t0()),
    ]));
    let engine = Engine::new(config(10), source.clone(), Arc::new(MemoryStore::new()), clock.clone());
    assert_ok!(engine.run_tick().await);

    source.delist("leaves");
    clock.advance_hours(48);
    let report = assert_ok!(engine.run_tick().await);

    let leaves = report
        .settled
        .iter()
        .find(|p| p.opportunity_id == "leaves")
        .and_then(|p| p.settlement())
        .unwrap();
    assert_eq!(leaves.exit_source, ExitSource::EntrySnapshot);
    assert_eq!(leaves.realized_pnl, 0.0);

    let stays = report
        .settled
        .iter()
        .find(|p| p.opportunity_id == "stays")
        .and_then(|p| p.settlement())
        .unwrap();
    assert_eq!(stays.exit_source, ExitSource::Live);
}

#[tokio::test]
async fn test_outage_then_recovery() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(MockSource::with_pools(3, t0()));
    let engine = Engine::new(config(10), source.clone(), Arc::new(MemoryStore::new()), clock.clone());
    assert_ok!(engine.run_tick().await);

    source.set_error("upstream 503");
    clock.advance_hours(50);
    let report = assert_ok!(engine.run_tick().await);
    assert!(!report.source_available);
    assert_eq!(report.settled.len(), 3);
    assert!(report.opened.is_empty());
    assert!(report
        .settled
        .iter()
        .filter_map(|p| p.settlement())
        .all(|s| s.exit_source == ExitSource::EntrySnapshot));

    source.clear_error();
    let report = assert_ok!(engine.run_tick().await);
    assert!(report.source_available);
    assert_eq!(report.opened.len(), 3);
}

#[tokio::test]
async fn test_state_survives_restart_on_disk() {
    let path = std::env::temp_dir().join(format!("harvester_it_{}.json", uuid::Uuid::new_v4()));
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(MockSource::with_pools(4, t0()));

    {
        let store = Arc::new(JsonFileStore::new(&path));
        let engine = Engine::new(config(10), source.clone(), store, clock.clone());
        assert_ok!(engine.initialize().await);
        assert_ok!(engine.run_tick().await);
        source.delist("pool-00");
        clock.advance_hours(48);
        assert_ok!(engine.run_tick().await);
    }

    let before_restart = {
        let store = JsonFileStore::new(&path);
        assert_ok!(store.load().await).unwrap()
    };

    let store = Arc::new(JsonFileStore::new(&path));
    let engine = Engine::new(config(10), source.clone(), store.clone(), clock.clone());
    assert_ok!(engine.initialize().await);

    let status = engine.status().await;
    assert_eq!(status.open_count, before_restart.open_count());
    let saved = before_restart.stats();
    assert_eq!(status.stats.total_opened, saved.total_opened);
    assert_eq!(status.stats.total_settled, 4);
    assert_eq!(status.stats.profitable_count, saved.profitable_count);
    assert!((status.stats.net_pnl() - saved.net_pnl()).abs() < 1e-9);
    assert_eq!(engine.history().await.len(), 4);

    // Restored positions are still unique: the next tick re-admits nothing.
    clock.advance_hours(1);
    let report = assert_ok!(engine.run_tick().await);
    assert!(report.opened.is_empty());
    assert_eq!(report.rejections.get("already_open"), Some(&3));

    assert_ok!(store.delete().await);
}

#[tokio::test]
async fn test_corrupt_state_file_blocks_initialize() {
    let path = std::env::temp_dir().join(format!("harvester_it_{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, "{ not json").unwrap();

    let store = Arc::new(JsonFileStore::new(&path));
    let engine = Engine::new(
        config(10),
        Arc::new(MockSource::with_pools(1, t0())),
        store.clone(),
        Arc::new(ManualClock::new(t0())),
    );
    assert_err!(engine.initialize().await);

    assert_ok!(store.delete().await);
}

#[tokio::test]
async fn test_exit_phase_skips_source_when_nothing_due() {
    let clock = Arc::new(ManualClock::new(t0()));
    let source = Arc::new(MockSource::with_pools(2, t0()));
    let engine = Engine::new(config(2), source.clone(), Arc::new(MemoryStore::new()), clock.clone());

    assert_ok!(engine.run_tick().await);
    assert_eq!(source.calls(), 1);

    // At capacity and nothing due: no source call at all.
    clock.advance_hours(1);
    let report = assert_ok!(engine.run_tick().await);
    assert_eq!(source.calls(), 1);
    assert_eq!(report.open_after, 2);
}
