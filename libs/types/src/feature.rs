//! Derived feature vectors
//!
//! A [`FeatureVector`] is the immutable output of one derivation over one
//! aggregate version. Values live in a sorted map so two vectors derived from
//! the same state serialize to identical bytes.

use crate::ids::{EntityId, FeatureKey, FeatureSetId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Feature name → scalar value, sorted by name
pub type FeatureValues = BTreeMap<String, Decimal>;

/// Whether the event that produced a vector arrived within skew tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeliness {
    #[default]
    OnTime,
    OutOfOrder,
}

impl fmt::Display for Timeliness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeliness::OnTime => write!(f, "on_time"),
            Timeliness::OutOfOrder => write!(f, "out_of_order"),
        }
    }
}

/// Snapshot of one feature set for one entity at one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub entity_id: EntityId,
    pub feature_set_id: FeatureSetId,
    pub values: FeatureValues,
    /// Aggregate version this vector was derived from
    pub version: u64,
    /// Unix nanoseconds when the engine produced the vector
    pub computed_at: i64,
    pub timeliness: Timeliness,
}

impl FeatureVector {
    pub fn new(
        entity_id: EntityId,
        feature_set_id: FeatureSetId,
        values: FeatureValues,
        version: u64,
        computed_at: i64,
        timeliness: Timeliness,
    ) -> Self {
        Self {
            entity_id,
            feature_set_id,
            values,
            version,
            computed_at,
            timeliness,
        }
    }

    pub fn key(&self) -> FeatureKey {
        FeatureKey::new(self.entity_id.clone(), self.feature_set_id.clone())
    }

    /// Look up a single feature value
    pub fn get(&self, name: &str) -> Option<Decimal> {
        self.values.get(name).copied()
    }

    pub fn is_out_of_order(&self) -> bool {
        self.timeliness == Timeliness::OutOfOrder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(version: u64) -> FeatureVector {
        let mut values = FeatureValues::new();
        values.insert("rating_count".to_string(), Decimal::from(2));
        values.insert("average_rating".to_string(), Decimal::new(45, 1));
        FeatureVector::new(
            EntityId::new("u1"),
            FeatureSetId::new("user_rating_stats"),
            values,
            version,
            0,
            Timeliness::OnTime,
        )
    }

    #[test]
    fn test_values_serialize_sorted() {
        let json = serde_json::to_string(&vector(2)).unwrap();
        let avg = json.find("average_rating").unwrap();
        let count = json.find("rating_count").unwrap();
        assert!(avg < count);
        assert!(json.contains("\"timeliness\":\"on_time\""));
    }

    #[test]
    fn test_get_and_key() {
        let v = vector(2);
        assert_eq!(v.get("average_rating"), Some(Decimal::new(45, 1)));
        assert_eq!(v.get("missing"), None);
        assert_eq!(v.key().to_string(), "u1/user_rating_stats");
        assert!(!v.is_out_of_order());
    }
}
