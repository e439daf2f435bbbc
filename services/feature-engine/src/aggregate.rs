//! Per-entity running aggregates
//!
//! An [`AggregateState`] is owned by exactly one lane. Every accepted event
//! folds into it once and bumps `version`; derivations read it and nothing
//! else, so a restored state re-derives the same values.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use types::errors::ValidationError;
use types::event::Event;
use types::feature::Timeliness;
use types::ids::{EntityId, EventId};

// ── Counter and sum names ───────────────────────────────────────────

pub const EVENTS: &str = "events";
pub const RATING_COUNT: &str = "rating_count";
pub const RATING_SUM: &str = "rating_sum";
pub const RATING_SQ_SUM: &str = "rating_sq_sum";
pub const GENRE_TAGS: &str = "genre_tags";

pub fn event_type_counter(label: &str) -> String {
    format!("event_type:{label}")
}

/// Interactions tagged with a genre
pub fn genre_counter(genre: &str) -> String {
    format!("genre:{genre}")
}

/// Ratings given to items of a genre
pub fn genre_rated_counter(genre: &str) -> String {
    format!("genre_rated:{genre}")
}

pub fn genre_rating_sum(genre: &str) -> String {
    format!("genre_rating_sum:{genre}")
}

// ── Aggregate State ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateState {
    pub entity_id: EntityId,
    pub counters: BTreeMap<String, u64>,
    pub running_sums: BTreeMap<String, Decimal>,
    pub rating_min: Option<Decimal>,
    pub rating_max: Option<Decimal>,
    pub first_event_time: Option<i64>,
    /// Largest event time folded so far
    pub last_event_time: Option<i64>,
    pub version: u64,
    /// Most recently applied event ids, oldest first
    pub recent_events: VecDeque<EventId>,
    /// Genres of the newest genre-tagged event, by event time
    pub last_genres: Vec<String>,
    pub last_genre_time: Option<i64>,
}

impl AggregateState {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            counters: BTreeMap::new(),
            running_sums: BTreeMap::new(),
            rating_min: None,
            rating_max: None,
            first_event_time: None,
            last_event_time: None,
            version: 0,
            recent_events: VecDeque::new(),
            last_genres: Vec::new(),
            last_genre_time: None,
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn sum(&self, name: &str) -> Decimal {
        self.running_sums.get(name).copied().unwrap_or(Decimal::ZERO)
    }

    /// Counters sharing a `prefix:` namespace, with the prefix stripped
    pub fn counters_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, u64)> + 'a {
        self.counters
            .iter()
            .filter_map(move |(name, value)| {
                name.strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix(':'))
                    .map(|rest| (rest, *value))
            })
    }

    /// Whether `event_id` was applied within the de-duplication window
    pub fn has_applied(&self, event_id: &EventId) -> bool {
        self.recent_events.contains(event_id)
    }

    /// Fold one event into the aggregate.
    ///
    /// Classifies the event against `last_event_time` first: an event older
    /// than that by more than `skew_tolerance_ns` is still applied but
    /// reported as out of order. On error the state may be partially
    /// updated, so callers fold into a copy.
    pub fn fold(
        &mut self,
        event: &Event,
        skew_tolerance_ns: i64,
        dedup_window: usize,
    ) -> Result<Timeliness, ValidationError> {
        let timeliness = match self.last_event_time {
            Some(last) if event.event_time < last.saturating_sub(skew_tolerance_ns) => {
                Timeliness::OutOfOrder
            }
            _ => Timeliness::OnTime,
        };

        self.bump(EVENTS, 1)?;
        self.bump(&event_type_counter(event.event_type.label()), 1)?;

        for genre in &event.payload.genres {
            self.bump(&genre_counter(genre), 1)?;
            self.bump(GENRE_TAGS, 1)?;
        }
        if !event.payload.genres.is_empty()
            && self.last_genre_time.map_or(true, |t| event.event_time >= t)
        {
            self.last_genres = event.payload.genres.clone();
            self.last_genre_time = Some(event.event_time);
        }

        if let Some(rating) = event.payload.rating {
            self.bump(RATING_COUNT, 1)?;
            self.add(RATING_SUM, rating)?;
            let square = rating
                .checked_mul(rating)
                .ok_or_else(|| overflow(RATING_SQ_SUM))?;
            self.add(RATING_SQ_SUM, square)?;
            for genre in &event.payload.genres {
                self.bump(&genre_rated_counter(genre), 1)?;
                self.add(&genre_rating_sum(genre), rating)?;
            }
            self.rating_min = Some(self.rating_min.map_or(rating, |m| m.min(rating)));
            self.rating_max = Some(self.rating_max.map_or(rating, |m| m.max(rating)));
        }

        self.first_event_time = Some(
            self.first_event_time
                .map_or(event.event_time, |t| t.min(event.event_time)),
        );
        self.last_event_time = Some(
            self.last_event_time
                .map_or(event.event_time, |t| t.max(event.event_time)),
        );

        self.version = self.version.checked_add(1).ok_or_else(|| overflow("version"))?;

        self.recent_events.push_back(event.event_id);
        while self.recent_events.len() > dedup_window {
            self.recent_events.pop_front();
        }

        Ok(timeliness)
    }

    fn bump(&mut self, name: &str, by: u64) -> Result<(), ValidationError> {
        let slot = self.counters.entry(name.to_string()).or_insert(0);
        *slot = slot.checked_add(by).ok_or_else(|| overflow(name))?;
        Ok(())
    }

    fn add(&mut self, name: &str, value: Decimal) -> Result<(), ValidationError> {
        let slot = self.running_sums.entry(name.to_string()).or_insert(Decimal::ZERO);
        *slot = slot.checked_add(value).ok_or_else(|| overflow(name))?;
        Ok(())
    }
}

fn overflow(name: &str) -> ValidationError {
    ValidationError::Malformed(format!("{name} overflowed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::event::{EventType, InteractionPayload};
    use types::time::NANOS_PER_SEC;

    fn rate(rating: i64, t: i64) -> Event {
        Event::new(
            EntityId::new("u1"),
            EventType::Rate,
            InteractionPayload::rating(10, Decimal::from(rating)).with_genres(["Drama"]),
            t,
            t,
        )
    }

    #[test]
    fn test_fold_accumulates() {
        let mut state = AggregateState::new(EntityId::new("u1"));
        state.fold(&rate(4, 1), 0, 8).unwrap();
        state.fold(&rate(5, 2), 0, 8).unwrap();

        assert_eq!(state.version, 2);
        assert_eq!(state.counter(EVENTS), 2);
        assert_eq!(state.counter(RATING_COUNT), 2);
        assert_eq!(state.counter("event_type:rate"), 2);
        assert_eq!(state.counter("genre:Drama"), 2);
        assert_eq!(state.sum(RATING_SUM), Decimal::from(9));
        assert_eq!(state.sum(RATING_SQ_SUM), Decimal::from(41));
        assert_eq!(state.sum("genre_rating_sum:Drama"), Decimal::from(9));
        assert_eq!(state.rating_min, Some(Decimal::from(4)));
        assert_eq!(state.rating_max, Some(Decimal::from(5)));
        assert_eq!(state.first_event_time, Some(1));
        assert_eq!(state.last_event_time, Some(2));
    }

    #[test]
    fn test_last_genres_follow_event_time() {
        let tagged = |genres: &[&str], t: i64| {
            Event::new(
                EntityId::new("u1"),
                EventType::View,
                InteractionPayload::item(1).with_genres(genres.iter().copied()),
                t,
                t,
            )
        };
        let mut state = AggregateState::new(EntityId::new("u1"));
        state.fold(&tagged(&["Drama"], 10), 0, 8).unwrap();
        state.fold(&tagged(&["Comedy", "Romance"], 20), 0, 8).unwrap();
        // Late arrival does not replace the newer genres
        state.fold(&tagged(&["Horror"], 15), 0, 8).unwrap();
        // Untagged events leave them alone
        state.fold(&tagged(&[], 30), 0, 8).unwrap();

        assert_eq!(state.last_genres, vec!["Comedy".to_string(), "Romance".to_string()]);
        assert_eq!(state.last_genre_time, Some(20));
    }

    #[test]
    fn test_skew_classification() {
        let tolerance = 5 * NANOS_PER_SEC;
        let mut state = AggregateState::new(EntityId::new("u1"));
        state.fold(&rate(4, 100 * NANOS_PER_SEC), tolerance, 8).unwrap();

        let within = state.fold(&rate(4, 96 * NANOS_PER_SEC), tolerance, 8).unwrap();
        assert_eq!(within, Timeliness::OnTime);

        let late = state.fold(&rate(4, 90 * NANOS_PER_SEC), tolerance, 8).unwrap();
        assert_eq!(late, Timeliness::OutOfOrder);

        // Late events never pull last_event_time backwards
        assert_eq!(state.last_event_time, Some(100 * NANOS_PER_SEC));
        assert_eq!(state.first_event_time, Some(90 * NANOS_PER_SEC));
    }

    #[test]
    fn test_dedup_window_is_bounded() {
        let mut state = AggregateState::new(EntityId::new("u1"));
        let first = rate(4, 1);
        state.fold(&first, 0, 2).unwrap();
        assert!(state.has_applied(&first.event_id));

        state.fold(&rate(4, 2), 0, 2).unwrap();
        state.fold(&rate(4, 3), 0, 2).unwrap();
        assert_eq!(state.recent_events.len(), 2);
        assert!(!state.has_applied(&first.event_id));
    }

    #[test]
    fn test_prefix_iteration() {
        let mut state = AggregateState::new(EntityId::new("u1"));
        state.fold(&rate(4, 1), 0, 8).unwrap();
        let genres: Vec<_> = state.counters_with_prefix("genre").collect();
        assert_eq!(genres, vec![("Drama", 1)]);
    }
}
