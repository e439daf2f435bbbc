//! Feature computation: validate, fold, derive
//!
//! [`FeatureEngine`] is stateless. It takes the current aggregate of an
//! entity and returns the folded copy plus the derived vectors, leaving the
//! caller's state untouched when the event is rejected.

use crate::aggregate::AggregateState;
use crate::derivation::DerivationRegistry;
use crate::validation;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use types::errors::ValidationError;
use types::event::Event;
use types::feature::FeatureVector;
use types::time::{Clock, SystemClock};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How far behind `last_event_time` an event may be and still count as
    /// on time
    pub skew_tolerance: Duration,
    /// Number of recent event ids remembered per entity for redelivery
    /// detection
    pub dedup_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            skew_tolerance: Duration::from_secs(5),
            dedup_window: 1024,
        }
    }
}

impl EngineConfig {
    pub fn skew_tolerance_ns(&self) -> i64 {
        i64::try_from(self.skew_tolerance.as_nanos()).unwrap_or(i64::MAX)
    }
}

/// Result of applying one accepted event
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The event was folded; `state` replaces the entity's aggregate
    Applied {
        state: AggregateState,
        vectors: Vec<FeatureVector>,
    },
    /// The event id was already applied to this aggregate
    Duplicate { version: u64 },
}

pub struct FeatureEngine {
    config: EngineConfig,
    registry: DerivationRegistry,
    clock: Arc<dyn Clock>,
}

impl FeatureEngine {
    pub fn new(config: EngineConfig, registry: DerivationRegistry) -> Self {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        registry: DerivationRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DerivationRegistry {
        &self.registry
    }

    /// Fold `event` into `current` (or a fresh aggregate) and derive every
    /// registered feature set.
    ///
    /// At most one mutation per accepted event: a validation or derivation
    /// failure returns an error and `current` is unchanged.
    pub fn apply(
        &self,
        current: Option<&AggregateState>,
        event: &Event,
    ) -> Result<ApplyOutcome, ValidationError> {
        validation::check_payload(event)?;

        if let Some(state) = current {
            if state.has_applied(&event.event_id) {
                debug!(
                    entity_id = %event.entity_id,
                    event_id = %event.event_id,
                    version = state.version,
                    "duplicate event"
                );
                return Ok(ApplyOutcome::Duplicate {
                    version: state.version,
                });
            }
        }

        let mut state = match current {
            Some(state) => state.clone(),
            None => AggregateState::new(event.entity_id.clone()),
        };
        let timeliness = state.fold(
            event,
            self.config.skew_tolerance_ns(),
            self.config.dedup_window,
        )?;
        let vectors = self
            .registry
            .derive_all(&state, timeliness, self.clock.now_nanos())?;

        Ok(ApplyOutcome::Applied { state, vectors })
    }

    /// Re-derive the vectors of an existing aggregate
    pub fn derive(&self, state: &AggregateState) -> Result<Vec<FeatureVector>, ValidationError> {
        self.registry
            .derive_all(state, Default::default(), self.clock.now_nanos())
    }
}
