//! Engine and store together: in-order folding, replays, skew and
//! determinism

use feature_engine::{
    DerivationRegistry, EngineConfig, FeatureEngine, Lane, LaneOutcome,
};
use feature_store::{CommitOutcome, VersionedStore};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use types::event::{Event, EventType, InteractionPayload};
use types::feature::FeatureVector;
use types::ids::{EntityId, FeatureKey, FeatureSetId};
use types::time::{ManualClock, NANOS_PER_SEC};

fn engine() -> Arc<FeatureEngine> {
    Arc::new(FeatureEngine::with_clock(
        EngineConfig::default(),
        DerivationRegistry::with_defaults(),
        Arc::new(ManualClock::new(1_000)),
    ))
}

fn rate(item: u64, rating: i64, t: i64) -> Event {
    Event::new(
        EntityId::new("u1"),
        EventType::Rate,
        InteractionPayload::rating(item, Decimal::from(rating)),
        t,
        t,
    )
}

fn stats_key() -> FeatureKey {
    FeatureKey::new(EntityId::new("u1"), FeatureSetId::new("user_rating_stats"))
}

/// Apply through the lane and commit every produced vector
fn deliver(lane: &mut Lane, store: &VersionedStore, offset: u64, event: &Event) -> LaneOutcome {
    let outcome = lane.apply(offset, event);
    if let LaneOutcome::Applied(vectors) = &outcome {
        for vector in vectors {
            store.apply_commit(vector.clone()).unwrap();
        }
    }
    outcome
}

#[test]
fn test_two_ratings_in_order() {
    let store = VersionedStore::in_memory();
    let mut lane = Lane::new(0, engine());

    deliver(&mut lane, &store, 0, &rate(10, 4, 1));
    deliver(&mut lane, &store, 1, &rate(11, 5, 2));

    let record = store.latest(&stats_key()).unwrap().unwrap();
    assert_eq!(record.version(), 2);
    assert_eq!(record.vector.get("average_rating"), Some(Decimal::new(45, 1)));
    assert_eq!(record.vector.get("rating_count"), Some(Decimal::from(2)));
}

#[test]
fn test_replayed_event_is_not_aggregated_twice() {
    let store = VersionedStore::in_memory();
    let mut lane = Lane::new(0, engine());
    let first = rate(10, 4, 1);
    let second = rate(11, 5, 2);

    deliver(&mut lane, &store, 0, &first);
    deliver(&mut lane, &store, 1, &second);

    // Bus redelivery at the same offset
    assert_eq!(deliver(&mut lane, &store, 1, &second), LaneOutcome::AlreadyApplied);
    // Producer retry republished the same event at a new offset
    assert_eq!(
        deliver(&mut lane, &store, 2, &second),
        LaneOutcome::Duplicate { version: 2 }
    );

    let record = store.latest(&stats_key()).unwrap().unwrap();
    assert_eq!(record.version(), 2);
    assert_eq!(record.vector.get("average_rating"), Some(Decimal::new(45, 1)));
    assert_eq!(lane.aggregate(&EntityId::new("u1")).unwrap().version, 2);
}

#[test]
fn test_store_rejects_replay_from_a_fresh_lane() {
    let store = VersionedStore::in_memory();
    let events = [rate(10, 4, 1), rate(11, 5, 2)];

    let mut lane = Lane::new(0, engine());
    for (offset, event) in events.iter().enumerate() {
        deliver(&mut lane, &store, offset as u64, event);
    }

    // A lane that lost its state re-derives versions 1 and 2
    let mut fresh = Lane::new(0, engine());
    for (offset, event) in events.iter().enumerate() {
        if let LaneOutcome::Applied(vectors) = fresh.apply(offset as u64, event) {
            for vector in vectors {
                let outcome = store.apply_commit(vector).unwrap();
                assert!(matches!(outcome, CommitOutcome::Rejected(_)));
            }
        }
    }
    assert_eq!(store.latest(&stats_key()).unwrap().unwrap().version(), 2);
}

#[test]
fn test_late_event_is_flagged_but_applied() {
    let mut lane = Lane::new(0, engine());
    lane.apply(0, &rate(10, 4, 100 * NANOS_PER_SEC));

    match lane.apply(1, &rate(11, 2, 10 * NANOS_PER_SEC)) {
        LaneOutcome::Applied(vectors) => {
            assert!(vectors.iter().all(FeatureVector::is_out_of_order));
            assert!(vectors.iter().all(|v| v.version == 2));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let state = lane.aggregate(&EntityId::new("u1")).unwrap();
    assert_eq!(state.last_event_time, Some(100 * NANOS_PER_SEC));
}

#[test]
fn test_invalid_event_does_not_mutate() {
    let mut lane = Lane::new(0, engine());
    lane.apply(0, &rate(10, 4, 1));
    let before = lane.aggregate(&EntityId::new("u1")).cloned();

    let bad = Event::new(
        EntityId::new("u1"),
        EventType::Rate,
        InteractionPayload::rating(11, Decimal::new(43, 1)),
        2,
        2,
    );
    assert!(matches!(lane.apply(1, &bad), LaneOutcome::Rejected(_)));
    assert_eq!(lane.aggregate(&EntityId::new("u1")).cloned(), before);
}

// ── Properties ──────────────────────────────────────────────────────

fn arb_events() -> impl Strategy<Value = Vec<Event>> {
    prop::collection::vec(
        (0u8..3, 1i64..=10, 0u64..50, 0i64..1_000, prop::bool::ANY),
        1..40,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .map(|(entity, half_stars, item, secs, genre)| {
                let rating = Decimal::new(half_stars * 5, 1);
                let mut payload = InteractionPayload::rating(item, rating);
                if genre {
                    payload = payload.with_genres(["Drama"]);
                }
                Event::new(
                    EntityId::new(format!("u{entity}")),
                    EventType::Rate,
                    payload,
                    secs * NANOS_PER_SEC,
                    secs * NANOS_PER_SEC,
                )
            })
            .collect()
    })
}

fn values_of(lane: &Lane) -> Vec<(EntityId, Vec<FeatureVector>)> {
    ["u0", "u1", "u2"]
        .into_iter()
        .map(EntityId::new)
        .map(|id| {
            let vectors = lane.rederive(&id).unwrap();
            (id, vectors)
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_same_events_same_values(events in arb_events()) {
        let mut a = Lane::new(0, engine());
        let mut b = Lane::new(0, engine());
        for (offset, event) in events.iter().enumerate() {
            let left = a.apply(offset as u64, event);
            let right = b.apply(offset as u64, event);
            prop_assert_eq!(left, right);
        }
        prop_assert_eq!(values_of(&a), values_of(&b));
    }

    #[test]
    fn prop_checkpoint_restore_matches_uninterrupted(
        events in arb_events(),
        cut in 0usize..40,
    ) {
        let cut = cut.min(events.len());

        let mut straight = Lane::new(0, engine());
        for (offset, event) in events.iter().enumerate() {
            straight.apply(offset as u64, event);
        }

        let mut first = Lane::new(0, engine());
        for (offset, event) in events[..cut].iter().enumerate() {
            first.apply(offset as u64, event);
        }
        let mut resumed = Lane::new(0, engine());
        resumed.restore(first.checkpoint()).unwrap();
        // Replaying from the log start must not double count
        for (offset, event) in events.iter().enumerate() {
            resumed.apply(offset as u64, event);
        }

        prop_assert_eq!(values_of(&straight), values_of(&resumed));
        prop_assert_eq!(straight.checkpoint(), resumed.checkpoint());
    }

    #[test]
    fn prop_versions_observed_never_decrease(events in arb_events()) {
        let store = VersionedStore::in_memory();
        let mut lane = Lane::new(0, engine());
        let mut seen = 0u64;
        for (offset, event) in events.iter().enumerate() {
            deliver(&mut lane, &store, offset as u64, event);
            // Redeliver the previous offset as well
            if offset > 0 {
                deliver(&mut lane, &store, offset as u64 - 1, &events[offset - 1]);
            }
            if let Some(record) = store.latest(&stats_key()).unwrap() {
                prop_assert!(record.version() >= seen);
                seen = record.version();
            }
        }
    }
}
