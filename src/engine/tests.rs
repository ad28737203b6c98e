use std::path::PathBuf;

use ulid::Ulid;

use crate::model::Span;
use crate::time::{parse_utc_iso, to_iso, SLOT_MS};

use super::{Engine, EngineError};

const SALT: &str = "test-salt";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("quorum_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}.wal"));
    let _ = std::fs::remove_file(&path);
    path
}

fn test_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), SALT.into()).unwrap()
}

fn base() -> i64 {
    parse_utc_iso("2026-02-20T10:00:00Z").unwrap()
}

/// 10:00–12:00 on the reference day, 8 slots.
fn two_hour_range() -> Span {
    Span::new(base(), base() + 8 * SLOT_MS)
}

async fn plan_with_owner(engine: &Engine, name: &str) -> super::CreatedPlan {
    engine
        .create_plan("Team sync", name, two_hour_range(), 60)
        .await
        .unwrap()
}

#[tokio::test]
async fn create_plan_returns_token_and_key() {
    let engine = test_engine("create_plan");
    let created = plan_with_owner(&engine, "Arjun").await;
    assert_eq!(created.token.len(), 8);
    assert_eq!(created.owner_key.len(), 24);
    assert_eq!(engine.plan_count(), 1);
}

#[tokio::test]
async fn create_plan_rejects_bad_input() {
    let engine = test_engine("create_plan_bad");
    let range = two_hour_range();

    let empty_title = engine.create_plan("   ", "Arjun", range, 60).await;
    assert!(matches!(empty_title, Err(EngineError::InvalidInput(_))));

    let unaligned = engine.create_plan("Sync", "Arjun", range, 50).await;
    assert!(matches!(unaligned, Err(EngineError::InvalidInput(_))));

    let zero = engine.create_plan("Sync", "Arjun", range, 0).await;
    assert!(matches!(zero, Err(EngineError::InvalidInput(_))));

    // Duration longer than the whole range.
    let too_long = engine.create_plan("Sync", "Arjun", range, 180).await;
    assert!(matches!(too_long, Err(EngineError::InvalidInput(_))));

    let long_title = "x".repeat(101);
    let oversized = engine.create_plan(&long_title, "Arjun", range, 60).await;
    assert!(matches!(oversized, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn join_unknown_plan_is_not_found() {
    let engine = test_engine("join_unknown");
    let result = engine.join_plan("zzzzzzzz", "Mei").await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn rejoin_same_name_reuses_participant() {
    let engine = test_engine("rejoin");
    let created = plan_with_owner(&engine, "Arjun").await;

    let first = engine.join_plan(&created.token, "Mei").await.unwrap();
    let second = engine.join_plan(&created.token, "Mei").await.unwrap();
    assert_eq!(first.participant_id, second.participant_id);
    assert!(!first.is_owner);

    let owner = engine.join_plan(&created.token, "Arjun").await.unwrap();
    assert!(owner.is_owner);

    let plan_arc = engine.get_plan(&created.token).unwrap();
    assert_eq!(plan_arc.read().await.participants.len(), 2);
}

#[tokio::test]
async fn whitespace_names_collapse_to_same_participant() {
    let engine = test_engine("trim_names");
    let created = plan_with_owner(&engine, "Arjun").await;

    let a = engine.join_plan(&created.token, "Mei").await.unwrap();
    let b = engine.join_plan(&created.token, "  Mei  ").await.unwrap();
    assert_eq!(a.participant_id, b.participant_id);
}

#[tokio::test]
async fn replace_availability_validates_and_stores_sorted() {
    let engine = test_engine("replace_availability");
    let created = plan_with_owner(&engine, "Arjun").await;
    let joined = engine.join_plan(&created.token, "Mei").await.unwrap();
    let pid = joined.participant_id;

    // Misaligned instant rejected, nothing stored.
    let misaligned = engine
        .replace_availability(&created.token, &pid, &[base() + 60_000])
        .await;
    assert!(matches!(misaligned, Err(EngineError::InvalidInput(_))));

    // Outside the range (the range end itself is exclusive).
    let out_of_range = engine
        .replace_availability(&created.token, &pid, &[base() + 8 * SLOT_MS])
        .await;
    assert!(matches!(out_of_range, Err(EngineError::InvalidInput(_))));

    let plan_arc = engine.get_plan(&created.token).unwrap();
    assert!(plan_arc.read().await.participant(&pid).unwrap().slots.is_empty());

    // Unsorted with duplicates: stored sorted, deduplicated.
    let stored = engine
        .replace_availability(
            &created.token,
            &pid,
            &[base() + 2 * SLOT_MS, base(), base() + 2 * SLOT_MS],
        )
        .await
        .unwrap();
    assert_eq!(stored, 2);
    assert_eq!(
        plan_arc.read().await.participant(&pid).unwrap().slots,
        vec![base(), base() + 2 * SLOT_MS]
    );

    // Second submission fully replaces the first.
    engine
        .replace_availability(&created.token, &pid, &[base() + 5 * SLOT_MS])
        .await
        .unwrap();
    assert_eq!(
        plan_arc.read().await.participant(&pid).unwrap().slots,
        vec![base() + 5 * SLOT_MS]
    );
}

#[tokio::test]
async fn replace_availability_unknown_participant() {
    let engine = test_engine("replace_unknown_participant");
    let created = plan_with_owner(&engine, "Arjun").await;
    let result = engine
        .replace_availability(&created.token, &Ulid::new(), &[base()])
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn compute_state_aggregates_heatmap_and_counts() {
    let engine = test_engine("compute_state");
    let created = plan_with_owner(&engine, "Arjun").await;

    let mei = engine.join_plan(&created.token, "Mei").await.unwrap();
    let noor = engine.join_plan(&created.token, "Noor").await.unwrap();
    engine
        .replace_availability(
            &created.token,
            &mei.participant_id,
            &[base(), base() + SLOT_MS, base() + 2 * SLOT_MS, base() + 3 * SLOT_MS],
        )
        .await
        .unwrap();
    engine
        .replace_availability(
            &created.token,
            &noor.participant_id,
            &[base() + SLOT_MS, base() + 2 * SLOT_MS, base() + 3 * SLOT_MS, base() + 4 * SLOT_MS],
        )
        .await
        .unwrap();

    let state = engine.compute_state(&created.token, None).await.unwrap();
    assert_eq!(state.body.total_participants, 2);
    assert_eq!(state.body.response_count, 2);
    assert_eq!(state.body.heatmap_data.len(), 8);
    assert_eq!(state.body.heatmap_data[0].count, 1);
    assert_eq!(state.body.heatmap_data[1].count, 2);
    assert_eq!(state.body.heatmap_data[7].count, 0);

    // No 60-minute window fits both (Mei lacks slot 4, Noor lacks slot 0),
    // so [0,4) and [1,5) tie at count 1 and the earlier one wins: Mei alone
    // at 10:00.
    let best = state.body.best_time.unwrap();
    assert_eq!(best.start_time, "2026-02-20T10:00:00.000Z");
    assert_eq!(best.count, 1);
    assert_eq!(best.participant_ids, vec![mei.participant_id]);
}

#[tokio::test]
async fn compute_state_unknown_token() {
    let engine = test_engine("state_unknown");
    let result = engine.compute_state("zzzzzzzz", None).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn is_owner_recomputed_on_cache_hit() {
    let engine = test_engine("is_owner_cache");
    let created = plan_with_owner(&engine, "Arjun").await;

    // First call populates the cache; second is a hit with a different viewer.
    let anon = engine.compute_state(&created.token, None).await.unwrap();
    assert!(!anon.is_owner);
    let owner = engine.compute_state(&created.token, Some("Arjun")).await.unwrap();
    assert!(owner.is_owner);
    let other = engine.compute_state(&created.token, Some("Mei")).await.unwrap();
    assert!(!other.is_owner);
}

#[tokio::test]
async fn mutations_invalidate_cached_state() {
    let engine = test_engine("cache_invalidation");
    let created = plan_with_owner(&engine, "Arjun").await;

    let before = engine.compute_state(&created.token, None).await.unwrap();
    assert_eq!(before.body.total_participants, 0);

    // Within the TTL, but the join must still be visible immediately.
    engine.join_plan(&created.token, "Mei").await.unwrap();
    let after = engine.compute_state(&created.token, None).await.unwrap();
    assert_eq!(after.body.total_participants, 1);
}

#[tokio::test]
async fn finalize_requires_owner_key() {
    let engine = test_engine("finalize_auth");
    let created = plan_with_owner(&engine, "Arjun").await;
    let joined = engine.join_plan(&created.token, "Mei").await.unwrap();
    engine
        .replace_availability(
            &created.token,
            &joined.participant_id,
            &[base(), base() + SLOT_MS, base() + 2 * SLOT_MS, base() + 3 * SLOT_MS],
        )
        .await
        .unwrap();

    let wrong = engine.finalize_plan(&created.token, "not-the-key").await;
    assert!(matches!(wrong, Err(EngineError::Unauthorized)));
    let empty = engine.finalize_plan(&created.token, "").await;
    assert!(matches!(empty, Err(EngineError::Unauthorized)));

    // Failed attempts must not have locked anything in.
    let plan_arc = engine.get_plan(&created.token).unwrap();
    assert!(plan_arc.read().await.finalized.is_none());
}

#[tokio::test]
async fn finalize_without_overlap_conflicts_and_stays_retryable() {
    let engine = test_engine("finalize_conflict");
    let created = plan_with_owner(&engine, "Arjun").await;
    engine.join_plan(&created.token, "Mei").await.unwrap();

    // Nobody has any availability.
    let result = engine.finalize_plan(&created.token, &created.owner_key).await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));

    // Availability arrives later; finalize now succeeds.
    let joined = engine.join_plan(&created.token, "Mei").await.unwrap();
    engine
        .replace_availability(
            &created.token,
            &joined.participant_id,
            &[base(), base() + SLOT_MS, base() + 2 * SLOT_MS, base() + 3 * SLOT_MS],
        )
        .await
        .unwrap();
    let finalized = engine
        .finalize_plan(&created.token, &created.owner_key)
        .await
        .unwrap();
    assert_eq!(finalized.finalized_start, "2026-02-20T10:00:00.000Z");
    assert_eq!(finalized.count, 1);
}

#[tokio::test]
async fn finalize_is_idempotent_across_availability_changes() {
    let engine = test_engine("finalize_idempotent");
    let created = plan_with_owner(&engine, "Arjun").await;
    let mei = engine.join_plan(&created.token, "Mei").await.unwrap();
    engine
        .replace_availability(
            &created.token,
            &mei.participant_id,
            &[base(), base() + SLOT_MS, base() + 2 * SLOT_MS, base() + 3 * SLOT_MS],
        )
        .await
        .unwrap();

    let first = engine
        .finalize_plan(&created.token, &created.owner_key)
        .await
        .unwrap();

    // Mei withdraws; the committed window must not move, but the attendance
    // count reflects current availability.
    engine
        .replace_availability(&created.token, &mei.participant_id, &[])
        .await
        .unwrap();
    let second = engine
        .finalize_plan(&created.token, &created.owner_key)
        .await
        .unwrap();
    assert_eq!(second.finalized_start, first.finalized_start);
    assert_eq!(second.finalized_end, first.finalized_end);
    assert_eq!(second.count, 0);
    assert!(second.participant_ids.is_empty());
}

#[tokio::test]
async fn finalized_window_drives_state_best_time() {
    let engine = test_engine("finalized_state");
    let created = plan_with_owner(&engine, "Arjun").await;
    let mei = engine.join_plan(&created.token, "Mei").await.unwrap();
    engine
        .replace_availability(
            &created.token,
            &mei.participant_id,
            &[base() + 2 * SLOT_MS, base() + 3 * SLOT_MS, base() + 4 * SLOT_MS, base() + 5 * SLOT_MS],
        )
        .await
        .unwrap();
    let finalized = engine
        .finalize_plan(&created.token, &created.owner_key)
        .await
        .unwrap();

    let state = engine.compute_state(&created.token, None).await.unwrap();
    assert_eq!(state.body.plan.finalized_start.as_deref(), Some(finalized.finalized_start.as_str()));
    let best = state.body.best_time.unwrap();
    assert_eq!(best.start_time, finalized.finalized_start);
    assert_eq!(best.end_time, finalized.finalized_end);
    assert_eq!(best.count, 1);
}

#[tokio::test]
async fn replay_rebuilds_full_state() {
    let path = test_wal_path("replay_full");
    let (token, owner_key, pid, finalized_start);
    {
        let engine = Engine::new(path.clone(), SALT.into()).unwrap();
        let created = plan_with_owner(&engine, "Arjun").await;
        let joined = engine.join_plan(&created.token, "Mei").await.unwrap();
        engine
            .replace_availability(
                &created.token,
                &joined.participant_id,
                &[base(), base() + SLOT_MS, base() + 2 * SLOT_MS, base() + 3 * SLOT_MS],
            )
            .await
            .unwrap();
        let view = engine
            .finalize_plan(&created.token, &created.owner_key)
            .await
            .unwrap();
        token = created.token;
        owner_key = created.owner_key;
        pid = joined.participant_id;
        finalized_start = view.finalized_start;
    }

    let engine = Engine::new(path, SALT.into()).unwrap();
    assert_eq!(engine.plan_count(), 1);

    let plan_arc = engine.get_plan(&token).unwrap();
    {
        let plan = plan_arc.read().await;
        assert_eq!(plan.title, "Team sync");
        assert_eq!(plan.participants.len(), 1);
        assert_eq!(plan.participants[0].id, pid);
        assert_eq!(plan.participants[0].slots.len(), 4);
        let window = plan.finalized.unwrap();
        assert_eq!(to_iso(window.start), finalized_start);
    }

    // The owner key still verifies against the replayed hash.
    let again = engine.finalize_plan(&token, &owner_key).await.unwrap();
    assert_eq!(again.finalized_start, finalized_start);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction");
    let engine = Engine::new(path.clone(), SALT.into()).unwrap();
    let created = plan_with_owner(&engine, "Arjun").await;
    let joined = engine.join_plan(&created.token, "Mei").await.unwrap();
    // Churn the log.
    for i in 0..10 {
        engine
            .replace_availability(&created.token, &joined.participant_id, &[base() + i * SLOT_MS])
            .await
            .unwrap();
    }
    assert!(engine.wal_appends_since_compact().await >= 12);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    drop(engine);
    let engine = Engine::new(path, SALT.into()).unwrap();
    let plan_arc = engine.get_plan(&created.token).unwrap();
    let plan = plan_arc.read().await;
    assert_eq!(plan.participants.len(), 1);
    assert_eq!(plan.participants[0].slots, vec![base() + 9 * SLOT_MS]);
}
