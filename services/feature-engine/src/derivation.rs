//! Pluggable feature derivations
//!
//! A [`Derivation`] turns an [`AggregateState`] into the values of one
//! feature set. Derivations are pure: same state, same values, bit for bit.
//! Each one serves a single [`EntityKind`]; users and items get different
//! feature sets from the same event stream.

use crate::aggregate::{self, AggregateState};
use rust_decimal::prelude::*;
use std::sync::Arc;
use types::errors::ValidationError;
use types::event::EventType;
use types::feature::{FeatureValues, FeatureVector, Timeliness};
use types::ids::{EntityKind, FeatureSetId};
use types::time::NANOS_PER_DAY;

/// Decimal places kept on ratios and averages
const SCALE: u32 = 6;

pub const USER_RATING_STATS: &str = "user_rating_stats";
pub const USER_ACTIVITY: &str = "user_activity";
pub const MOVIE_STATS: &str = "movie_stats";

pub trait Derivation: Send + Sync {
    fn feature_set(&self) -> &FeatureSetId;

    /// Entities this feature set is computed for
    fn entity_kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn derive(&self, state: &AggregateState) -> Result<FeatureValues, ValidationError>;
}

// ── Registry ────────────────────────────────────────────────────────

/// Ordered set of derivations run on every applied event
#[derive(Clone, Default)]
pub struct DerivationRegistry {
    derivations: Vec<Arc<dyn Derivation>>,
}

impl DerivationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in user and item feature sets
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(UserRatingStats::new()));
        registry.register(Arc::new(UserActivity::new()));
        registry.register(Arc::new(MovieStats::new()));
        registry
    }

    /// Add a derivation, replacing any registered for the same feature set
    pub fn register(&mut self, derivation: Arc<dyn Derivation>) {
        self.derivations
            .retain(|d| d.feature_set() != derivation.feature_set());
        self.derivations.push(derivation);
    }

    pub fn feature_sets(&self) -> Vec<FeatureSetId> {
        self.derivations
            .iter()
            .map(|d| d.feature_set().clone())
            .collect()
    }

    pub fn contains(&self, feature_set: &FeatureSetId) -> bool {
        self.derivations.iter().any(|d| d.feature_set() == feature_set)
    }

    pub fn len(&self) -> usize {
        self.derivations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.derivations.is_empty()
    }

    /// Run every derivation for the state's entity kind; any failure fails
    /// the whole event
    pub fn derive_all(
        &self,
        state: &AggregateState,
        timeliness: Timeliness,
        computed_at: i64,
    ) -> Result<Vec<FeatureVector>, ValidationError> {
        let kind = state.entity_id.kind();
        self.derivations
            .iter()
            .filter(|d| d.entity_kind() == kind)
            .map(|d| {
                let values = d.derive(state)?;
                Ok(FeatureVector::new(
                    state.entity_id.clone(),
                    d.feature_set().clone(),
                    values,
                    state.version,
                    computed_at,
                    timeliness,
                ))
            })
            .collect()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn failure(feature_set: &FeatureSetId, reason: impl Into<String>) -> ValidationError {
    ValidationError::Derivation {
        feature_set: feature_set.to_string(),
        reason: reason.into(),
    }
}

/// `num / den` rounded to [`SCALE`], zero when `den` is zero
fn ratio(fs: &FeatureSetId, num: Decimal, den: Decimal) -> Result<Decimal, ValidationError> {
    if den.is_zero() {
        return Ok(Decimal::ZERO);
    }
    num.checked_div(den)
        .map(|q| q.round_dp(SCALE).normalize())
        .ok_or_else(|| failure(fs, "division overflow"))
}

/// Mean, sample deviation and extrema of the ratings folded into a state
struct RatingDistribution {
    count: Decimal,
    average: Decimal,
    std: Decimal,
    min: Decimal,
    max: Decimal,
}

impl RatingDistribution {
    fn of(fs: &FeatureSetId, state: &AggregateState) -> Result<Self, ValidationError> {
        let count = Decimal::from(state.counter(aggregate::RATING_COUNT));
        let sum = state.sum(aggregate::RATING_SUM);
        let sq_sum = state.sum(aggregate::RATING_SQ_SUM);

        let average = ratio(fs, sum, count)?;

        // Sample standard deviation; zero with fewer than two ratings
        let std = if count > Decimal::ONE {
            let mean_sq = sum
                .checked_mul(sum)
                .and_then(|s| s.checked_div(count))
                .ok_or_else(|| failure(fs, "sum of squares overflow"))?;
            let variance = (sq_sum - mean_sq)
                .checked_div(count - Decimal::ONE)
                .ok_or_else(|| failure(fs, "variance overflow"))?
                .max(Decimal::ZERO);
            variance
                .sqrt()
                .ok_or_else(|| failure(fs, "variance has no square root"))?
                .round_dp(SCALE)
                .normalize()
        } else {
            Decimal::ZERO
        };

        Ok(Self {
            count,
            average,
            std,
            min: state.rating_min.unwrap_or(Decimal::ZERO),
            max: state.rating_max.unwrap_or(Decimal::ZERO),
        })
    }
}

// ── user_rating_stats ───────────────────────────────────────────────

/// Rating distribution of a user: mean, sample deviation, extrema and the
/// span of days the user has been active
pub struct UserRatingStats {
    id: FeatureSetId,
}

impl UserRatingStats {
    pub fn new() -> Self {
        Self {
            id: FeatureSetId::new(USER_RATING_STATS),
        }
    }
}

impl Default for UserRatingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Derivation for UserRatingStats {
    fn feature_set(&self) -> &FeatureSetId {
        &self.id
    }

    fn derive(&self, state: &AggregateState) -> Result<FeatureValues, ValidationError> {
        let fs = &self.id;
        let RatingDistribution {
            count,
            average,
            std,
            min,
            max,
        } = RatingDistribution::of(fs, state)?;

        let days_active = match (state.first_event_time, state.last_event_time) {
            (Some(first), Some(last)) => ratio(
                fs,
                Decimal::from(last.saturating_sub(first)),
                Decimal::from(NANOS_PER_DAY),
            )?,
            _ => Decimal::ZERO,
        };

        let mut values = FeatureValues::new();
        values.insert("average_rating".into(), average);
        values.insert("rating_count".into(), count);
        values.insert("rating_std".into(), std);
        values.insert("min_rating".into(), min);
        values.insert("max_rating".into(), max);
        values.insert("rating_range".into(), max - min);
        values.insert("days_active".into(), days_active);
        Ok(values)
    }
}

// ── user_activity ───────────────────────────────────────────────────

/// Interaction volume, per-type counts and genre preferences of a user
pub struct UserActivity {
    id: FeatureSetId,
}

impl UserActivity {
    pub fn new() -> Self {
        Self {
            id: FeatureSetId::new(USER_ACTIVITY),
        }
    }
}

impl Default for UserActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Derivation for UserActivity {
    fn feature_set(&self) -> &FeatureSetId {
        &self.id
    }

    fn derive(&self, state: &AggregateState) -> Result<FeatureValues, ValidationError> {
        let fs = &self.id;
        let mut values = FeatureValues::new();

        values.insert(
            "recent_activity".into(),
            Decimal::from(state.counter(aggregate::EVENTS)),
        );
        for event_type in types::event::EventType::ALL {
            let label = event_type.label();
            values.insert(
                format!("{label}_count"),
                Decimal::from(state.counter(&aggregate::event_type_counter(label))),
            );
        }

        // Favourite genre: most rated, ties broken by name
        let mut favourite: Option<(&str, u64)> = None;
        for (genre, rated) in state.counters_with_prefix("genre_rated") {
            if favourite.map_or(true, |(_, best)| rated > best) {
                favourite = Some((genre, rated));
            }
        }
        let (favourite_count, favourite_avg) = match favourite {
            Some((genre, rated)) => (
                Decimal::from(rated),
                ratio(
                    fs,
                    state.sum(&aggregate::genre_rating_sum(genre)),
                    Decimal::from(rated),
                )?,
            ),
            None => (Decimal::ZERO, Decimal::ZERO),
        };
        values.insert("favorite_genre_count".into(), favourite_count);
        values.insert("favorite_genre_avg_rating".into(), favourite_avg);

        let tagged = Decimal::from(state.counter(aggregate::GENRE_TAGS));
        for (genre, count) in state.counters_with_prefix("genre") {
            values.insert(
                format!("genre_pref:{genre}"),
                ratio(fs, Decimal::from(count), tagged)?,
            );
        }

        // One-hot over the genres of the newest tagged interaction
        for genre in &state.last_genres {
            values.insert(format!("last_genre:{genre}"), Decimal::ONE);
        }

        Ok(values)
    }
}

// ── movie_stats ─────────────────────────────────────────────────────

/// Rating distribution, interaction popularity and a Bayesian quality
/// score of a catalogue item
///
/// The quality score shrinks the item's mean toward `prior_mean` with the
/// weight of `prior_count` virtual ratings.
pub struct MovieStats {
    id: FeatureSetId,
    prior_count: Decimal,
    prior_mean: Decimal,
}

impl MovieStats {
    pub fn new() -> Self {
        Self::with_prior(Decimal::from(10), Decimal::new(35, 1))
    }

    pub fn with_prior(prior_count: Decimal, prior_mean: Decimal) -> Self {
        Self {
            id: FeatureSetId::new(MOVIE_STATS),
            prior_count: prior_count.max(Decimal::ZERO),
            prior_mean,
        }
    }
}

impl Default for MovieStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Derivation for MovieStats {
    fn feature_set(&self) -> &FeatureSetId {
        &self.id
    }

    fn entity_kind(&self) -> EntityKind {
        EntityKind::Item
    }

    fn derive(&self, state: &AggregateState) -> Result<FeatureValues, ValidationError> {
        let fs = &self.id;
        let RatingDistribution {
            count,
            average,
            std,
            min,
            max,
        } = RatingDistribution::of(fs, state)?;

        let views = state.counter(&aggregate::event_type_counter(EventType::View.label()));
        let clicks = state.counter(&aggregate::event_type_counter(EventType::Click.label()));
        let popularity = views
            .checked_add(clicks)
            .ok_or_else(|| failure(fs, "popularity overflow"))?;

        let popularity_score = (Decimal::ONE + count)
            .checked_ln()
            .ok_or_else(|| failure(fs, "popularity score has no logarithm"))?
            .round_dp(SCALE)
            .normalize();

        let weighted = self
            .prior_count
            .checked_mul(self.prior_mean)
            .and_then(|prior| prior.checked_add(state.sum(aggregate::RATING_SUM)))
            .ok_or_else(|| failure(fs, "quality score overflow"))?;
        let quality_score = ratio(fs, weighted, self.prior_count + count)?;

        let mut values = FeatureValues::new();
        values.insert("movie_avg_rating".into(), average);
        values.insert("movie_rating_count".into(), count);
        values.insert("movie_rating_std".into(), std);
        values.insert("movie_min_rating".into(), min);
        values.insert("movie_max_rating".into(), max);
        values.insert("movie_rating_range".into(), max - min);
        values.insert("movie_popularity".into(), Decimal::from(popularity));
        values.insert("movie_recent_views".into(), Decimal::from(views));
        values.insert("movie_popularity_score".into(), popularity_score);
        values.insert("movie_quality_score".into(), quality_score);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::event::{Event, EventType, InteractionPayload};
    use types::ids::EntityId;

    fn folded(events: &[Event]) -> AggregateState {
        let mut state = AggregateState::new(EntityId::new("u1"));
        for event in events {
            state.fold(event, 0, 64).unwrap();
        }
        state
    }

    fn rate(item: u64, rating: &str, genres: &[&str], t: i64) -> Event {
        Event::new(
            EntityId::new("u1"),
            EventType::Rate,
            InteractionPayload::rating(item, rating.parse().unwrap())
                .with_genres(genres.iter().copied()),
            t,
            t,
        )
    }

    fn view(item: u64, genres: &[&str], t: i64) -> Event {
        Event::new(
            EntityId::new("u1"),
            EventType::View,
            InteractionPayload::item(item).with_genres(genres.iter().copied()),
            t,
            t,
        )
    }

    #[test]
    fn test_rating_stats_average() {
        let state = folded(&[rate(10, "4", &[], 1), rate(11, "5", &[], 2)]);
        let values = UserRatingStats::new().derive(&state).unwrap();
        assert_eq!(values["average_rating"], Decimal::new(45, 1));
        assert_eq!(values["rating_count"], Decimal::from(2));
        assert_eq!(values["min_rating"], Decimal::from(4));
        assert_eq!(values["max_rating"], Decimal::from(5));
        assert_eq!(values["rating_range"], Decimal::ONE);
    }

    #[test]
    fn test_rating_std_is_sample_deviation() {
        let state = folded(&[
            rate(1, "1", &[], 1),
            rate(2, "3", &[], 2),
            rate(3, "5", &[], 3),
        ]);
        let values = UserRatingStats::new().derive(&state).unwrap();
        // mean 3, sample variance 4, deviation 2
        assert_eq!(values["rating_std"], Decimal::from(2));
    }

    #[test]
    fn test_single_rating_has_zero_std() {
        let state = folded(&[rate(1, "4", &[], 1)]);
        let values = UserRatingStats::new().derive(&state).unwrap();
        assert_eq!(values["rating_std"], Decimal::ZERO);
    }

    #[test]
    fn test_no_ratings_yields_zeroes() {
        let state = folded(&[view(1, &[], 1)]);
        let values = UserRatingStats::new().derive(&state).unwrap();
        assert_eq!(values["average_rating"], Decimal::ZERO);
        assert_eq!(values["rating_count"], Decimal::ZERO);
    }

    #[test]
    fn test_days_active() {
        let state = folded(&[rate(1, "4", &[], 0), rate(2, "4", &[], NANOS_PER_DAY * 3 / 2)]);
        let values = UserRatingStats::new().derive(&state).unwrap();
        assert_eq!(values["days_active"], Decimal::new(15, 1));
    }

    #[test]
    fn test_activity_counts_and_genres() {
        let state = folded(&[
            rate(1, "5", &["Drama"], 1),
            rate(2, "3", &["Comedy", "Drama"], 2),
            view(3, &["Comedy"], 3),
            Event::new(
                EntityId::new("u1"),
                EventType::Search,
                InteractionPayload::default(),
                4,
                4,
            ),
        ]);
        let values = UserActivity::new().derive(&state).unwrap();

        assert_eq!(values["recent_activity"], Decimal::from(4));
        assert_eq!(values["rate_count"], Decimal::from(2));
        assert_eq!(values["view_count"], Decimal::from(1));
        assert_eq!(values["search_count"], Decimal::from(1));
        assert_eq!(values["click_count"], Decimal::ZERO);

        // Drama rated twice (5 and 3), Comedy once
        assert_eq!(values["favorite_genre_count"], Decimal::from(2));
        assert_eq!(values["favorite_genre_avg_rating"], Decimal::from(4));

        // 4 genre tags: Drama 2, Comedy 2
        assert_eq!(values["genre_pref:Drama"], Decimal::new(5, 1));
        assert_eq!(values["genre_pref:Comedy"], Decimal::new(5, 1));
    }

    #[test]
    fn test_favourite_genre_tie_breaks_by_name() {
        let state = folded(&[rate(1, "5", &["Drama"], 1), rate(2, "2", &["Action"], 2)]);
        let values = UserActivity::new().derive(&state).unwrap();
        // Action sorts first and wins the tie
        assert_eq!(values["favorite_genre_avg_rating"], Decimal::from(2));
    }

    #[test]
    fn test_registry_replaces_same_feature_set() {
        let mut registry = DerivationRegistry::with_defaults();
        assert_eq!(registry.len(), 3);
        registry.register(Arc::new(UserActivity::new()));
        assert_eq!(registry.len(), 3);
        assert!(registry.contains(&FeatureSetId::new(USER_RATING_STATS)));
    }

    #[test]
    fn test_derive_all_stamps_version_and_timeliness() {
        let state = folded(&[rate(1, "4", &[], 1), rate(2, "4", &[], 2)]);
        let vectors = DerivationRegistry::with_defaults()
            .derive_all(&state, Timeliness::OutOfOrder, 99)
            .unwrap();
        assert_eq!(vectors.len(), 2);
        for vector in vectors {
            assert_eq!(vector.version, 2);
            assert_eq!(vector.computed_at, 99);
            assert!(vector.is_out_of_order());
        }
    }

    fn item_event(event_type: EventType, rating: Option<&str>, t: i64) -> Event {
        let payload = InteractionPayload {
            item_id: Some(7),
            rating: rating.map(|r| r.parse().unwrap()),
            ..InteractionPayload::default()
        };
        Event::new(EntityId::item(7), event_type, payload, t, t)
    }

    fn folded_item(events: &[Event]) -> AggregateState {
        let mut state = AggregateState::new(EntityId::item(7));
        for event in events {
            state.fold(event, 0, 64).unwrap();
        }
        state
    }

    #[test]
    fn test_movie_stats_values() {
        let state = folded_item(&[
            item_event(EventType::Rate, Some("4"), 1),
            item_event(EventType::Rate, Some("5"), 2),
            item_event(EventType::View, None, 3),
            item_event(EventType::Click, None, 4),
        ]);
        let values = MovieStats::new().derive(&state).unwrap();

        assert_eq!(values["movie_avg_rating"], Decimal::new(45, 1));
        assert_eq!(values["movie_rating_count"], Decimal::from(2));
        assert_eq!(values["movie_rating_std"], Decimal::new(707107, 6));
        assert_eq!(values["movie_rating_range"], Decimal::ONE);
        assert_eq!(values["movie_popularity"], Decimal::from(2));
        assert_eq!(values["movie_recent_views"], Decimal::ONE);
        // ln(1 + 2)
        assert_eq!(values["movie_popularity_score"], Decimal::new(1098612, 6));
        // (10 * 3.5 + 9) / (10 + 2)
        assert_eq!(values["movie_quality_score"], Decimal::new(3666667, 6));
    }

    #[test]
    fn test_unrated_movie_scores_at_prior() {
        let state = folded_item(&[item_event(EventType::View, None, 1)]);
        let values = MovieStats::new().derive(&state).unwrap();
        assert_eq!(values["movie_rating_count"], Decimal::ZERO);
        assert_eq!(values["movie_popularity_score"], Decimal::ZERO);
        assert_eq!(values["movie_quality_score"], Decimal::new(35, 1));
    }

    #[test]
    fn test_feature_sets_follow_entity_kind() {
        let registry = DerivationRegistry::with_defaults();

        let user = folded(&[rate(1, "4", &[], 1)]);
        let sets: Vec<_> = registry
            .derive_all(&user, Timeliness::OnTime, 1)
            .unwrap()
            .into_iter()
            .map(|v| v.feature_set_id.to_string())
            .collect();
        assert_eq!(sets, vec![USER_RATING_STATS, USER_ACTIVITY]);

        let item = folded_item(&[item_event(EventType::Rate, Some("4"), 1)]);
        let vectors = registry.derive_all(&item, Timeliness::OnTime, 1).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].feature_set_id.as_str(), MOVIE_STATS);
        assert_eq!(vectors[0].entity_id, EntityId::item(7));
    }

    #[test]
    fn test_last_genre_indicator() {
        let state = folded(&[
            view(1, &["Drama"], 1),
            view(2, &["Comedy", "Romance"], 2),
        ]);
        let values = UserActivity::new().derive(&state).unwrap();
        assert_eq!(values["last_genre:Comedy"], Decimal::ONE);
        assert_eq!(values["last_genre:Romance"], Decimal::ONE);
        assert!(!values.contains_key("last_genre:Drama"));
    }
}
