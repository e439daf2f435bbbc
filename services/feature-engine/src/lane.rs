//! One processing lane per bus partition
//!
//! A lane exclusively owns the aggregates of every entity routed to its
//! partition, so per-entity mutation is serialized without locks. It also
//! tracks the next bus offset to apply, which makes redelivered offsets
//! no-ops.

use crate::aggregate::AggregateState;
use crate::checkpoint::LaneCheckpoint;
use crate::engine::{ApplyOutcome, FeatureEngine};
use crate::error::EngineError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::errors::ValidationError;
use types::event::Event;
use types::feature::FeatureVector;
use types::ids::EntityId;

/// What a lane did with one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum LaneOutcome {
    Applied(Vec<FeatureVector>),
    /// Event id already folded into the entity's aggregate
    Duplicate { version: u64 },
    /// Offset below the lane's applied offset
    AlreadyApplied,
    /// Event failed validation or derivation; nothing changed
    Rejected(ValidationError),
}

pub struct Lane {
    partition: u32,
    engine: Arc<FeatureEngine>,
    aggregates: BTreeMap<EntityId, AggregateState>,
    /// Last version of evicted entities, so numbering resumes above it
    retired: BTreeMap<EntityId, u64>,
    next_offset: u64,
}

impl Lane {
    pub fn new(partition: u32, engine: Arc<FeatureEngine>) -> Self {
        Self {
            partition,
            engine,
            aggregates: BTreeMap::new(),
            retired: BTreeMap::new(),
            next_offset: 0,
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Next bus offset this lane has not yet applied
    pub fn applied_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn aggregate(&self, entity_id: &EntityId) -> Option<&AggregateState> {
        self.aggregates.get(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.aggregates.len()
    }

    /// Apply the event delivered at `offset`.
    ///
    /// The offset is consumed whatever the outcome; a rejected event is
    /// never retried.
    pub fn apply(&mut self, offset: u64, event: &Event) -> LaneOutcome {
        if offset < self.next_offset {
            debug!(
                partition = self.partition,
                offset,
                applied = self.next_offset,
                "skipping redelivered offset"
            );
            return LaneOutcome::AlreadyApplied;
        }
        self.next_offset = offset + 1;

        let resumed_state;
        let current = match self.aggregates.get(&event.entity_id) {
            Some(state) => Some(state),
            None => {
                resumed_state = self
                    .retired
                    .get(&event.entity_id)
                    .map(|&version| resumed(event.entity_id.clone(), version));
                resumed_state.as_ref()
            }
        };

        match self.engine.apply(current, event) {
            Ok(ApplyOutcome::Applied { state, vectors }) => {
                self.retired.remove(&event.entity_id);
                self.aggregates.insert(event.entity_id.clone(), state);
                LaneOutcome::Applied(vectors)
            }
            Ok(ApplyOutcome::Duplicate { version }) => LaneOutcome::Duplicate { version },
            Err(e) => {
                warn!(
                    partition = self.partition,
                    offset,
                    entity_id = %event.entity_id,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    reason = e.code(),
                    error = %e,
                    "event rejected"
                );
                LaneOutcome::Rejected(e)
            }
        }
    }

    /// Drop aggregates whose newest event is older than `before` (Unix
    /// nanoseconds). Returns how many were evicted.
    pub fn evict_idle(&mut self, before: i64) -> usize {
        let idle: Vec<EntityId> = self
            .aggregates
            .iter()
            .filter(|(_, state)| state.last_event_time.map_or(true, |t| t < before))
            .map(|(id, _)| id.clone())
            .collect();

        for entity_id in &idle {
            if let Some(state) = self.aggregates.remove(entity_id) {
                self.retired.insert(entity_id.clone(), state.version);
            }
        }
        if !idle.is_empty() {
            info!(partition = self.partition, evicted = idle.len(), "evicted idle aggregates");
        }
        idle.len()
    }

    pub fn checkpoint(&self) -> LaneCheckpoint {
        LaneCheckpoint {
            partition: self.partition,
            next_offset: self.next_offset,
            aggregates: self.aggregates.clone(),
            retired: self.retired.clone(),
        }
    }

    /// Replace the lane's state with `checkpoint`
    pub fn restore(&mut self, checkpoint: LaneCheckpoint) -> Result<(), EngineError> {
        if checkpoint.partition != self.partition {
            return Err(EngineError::CheckpointMismatch {
                expected: self.partition,
                found: checkpoint.partition,
            });
        }
        info!(
            partition = self.partition,
            next_offset = checkpoint.next_offset,
            entities = checkpoint.aggregates.len(),
            "lane restored from checkpoint"
        );
        self.aggregates = checkpoint.aggregates;
        self.retired = checkpoint.retired;
        self.next_offset = checkpoint.next_offset;
        Ok(())
    }

    /// Forget everything, as if the lane had never consumed an event
    pub fn reset(&mut self) {
        self.aggregates.clear();
        self.retired.clear();
        self.next_offset = 0;
    }

    /// Vectors of `entity_id` re-derived from its current aggregate
    pub fn rederive(&self, entity_id: &EntityId) -> Result<Vec<FeatureVector>, ValidationError> {
        match self.aggregates.get(entity_id) {
            Some(state) => self.engine.derive(state),
            None => Ok(Vec::new()),
        }
    }
}

fn resumed(entity_id: EntityId, version: u64) -> AggregateState {
    let mut state = AggregateState::new(entity_id);
    state.version = version;
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivation::DerivationRegistry;
    use crate::engine::EngineConfig;
    use rust_decimal::Decimal;
    use types::event::{EventType, InteractionPayload};

    fn new_lane() -> Lane {
        Lane::new(
            3,
            Arc::new(FeatureEngine::new(
                EngineConfig::default(),
                DerivationRegistry::with_defaults(),
            )),
        )
    }

    fn rate(entity: &str, rating: i64, t: i64) -> Event {
        Event::new(
            EntityId::new(entity),
            EventType::Rate,
            InteractionPayload::rating(10, Decimal::from(rating)),
            t,
            t,
        )
    }

    #[test]
    fn test_redelivered_offset_is_skipped() {
        let mut lane = new_lane();
        let event = rate("u1", 4, 1);
        assert!(matches!(lane.apply(0, &event), LaneOutcome::Applied(_)));
        assert_eq!(lane.apply(0, &event), LaneOutcome::AlreadyApplied);
        assert_eq!(lane.applied_offset(), 1);
    }

    #[test]
    fn test_rejected_event_consumes_offset() {
        let mut lane = new_lane();
        let bad = rate("u1", 7, 1);
        assert!(matches!(lane.apply(5, &bad), LaneOutcome::Rejected(_)));
        assert_eq!(lane.applied_offset(), 6);
        assert!(lane.aggregate(&EntityId::new("u1")).is_none());
    }

    #[test]
    fn test_evicted_entity_resumes_version_numbering() {
        let mut lane = new_lane();
        lane.apply(0, &rate("u1", 4, 10));
        lane.apply(1, &rate("u1", 4, 20));
        lane.apply(2, &rate("u2", 4, 100));

        assert_eq!(lane.evict_idle(50), 1);
        assert_eq!(lane.entity_count(), 1);

        match lane.apply(3, &rate("u1", 5, 200)) {
            LaneOutcome::Applied(vectors) => assert!(vectors.iter().all(|v| v.version == 3)),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_restore_rejects_other_partition() {
        let mut lane = new_lane();
        let mut checkpoint = lane.checkpoint();
        checkpoint.partition = 9;
        assert!(matches!(
            lane.restore(checkpoint),
            Err(EngineError::CheckpointMismatch { expected: 3, found: 9 })
        ));
    }

    #[test]
    fn test_checkpoint_roundtrip_rederives_same_values() {
        let mut lane = new_lane();
        lane.apply(0, &rate("u1", 4, 1));
        lane.apply(1, &rate("u1", 5, 2));
        let before = lane.rederive(&EntityId::new("u1")).unwrap();

        let checkpoint = lane.checkpoint();
        let mut restored = new_lane();
        restored.restore(checkpoint).unwrap();

        let after = restored.rederive(&EntityId::new("u1")).unwrap();
        let values = |vs: &[FeatureVector]| vs.iter().map(|v| v.values.clone()).collect::<Vec<_>>();
        assert_eq!(values(&before), values(&after));
        assert_eq!(restored.applied_offset(), 2);
    }
}
