//! Identifier types for entities, feature sets and events
//!
//! Event ids use UUID v7 so they sort by creation time, which keeps
//! de-duplication windows and journal dumps readable in arrival order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a raw interaction event
///
/// Assigned by the producer. A replayed event keeps its id, which is what
/// lets the computation engine recognise redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new EventId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Stable id of the item-keyed copy of this event. Only the random
    /// tail bits change, so a redelivered event maps to the same copy id.
    pub fn item_copy(&self) -> Self {
        Self(Uuid::from_u128(self.0.as_u128() ^ ITEM_COPY_MASK))
    }
}

/// Flips bits in the low 48 random bits of a v7 UUID only
const ITEM_COPY_MASK: u128 = 0x0000_0000_0000_0000_0000_6974_656d_2f31;

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prefix that marks an item entity id ("item:42")
pub const ITEM_PREFIX: &str = "item:";

/// What an entity id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Item,
}

/// Subject of feature computation (a user or an item)
///
/// Also the partition key of the event stream: every event of one entity
/// lands on the same partition and therefore the same processing lane.
/// Item ids carry the [`ITEM_PREFIX`]; everything else is a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create a new EntityId
    ///
    /// # Panics
    /// Panics if the id is empty
    pub fn new(id: impl Into<String>) -> Self {
        let s = id.into();
        assert!(!s.is_empty(), "EntityId must not be empty");
        Self(s)
    }

    /// Try to create an EntityId, returning None if empty
    pub fn try_new(id: impl Into<String>) -> Option<Self> {
        let s = id.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Entity id of catalogue item `item_id`
    pub fn item(item_id: u64) -> Self {
        Self(format!("{ITEM_PREFIX}{item_id}"))
    }

    pub fn kind(&self) -> EntityKind {
        if self.0.starts_with(ITEM_PREFIX) {
            EntityKind::Item
        } else {
            EntityKind::User
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Named group of features computed together (e.g. "user_rating_stats")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSetId(String);

impl FeatureSetId {
    /// # Panics
    /// Panics if the id is empty
    pub fn new(id: impl Into<String>) -> Self {
        let s = id.into();
        assert!(!s.is_empty(), "FeatureSetId must not be empty");
        Self(s)
    }

    pub fn try_new(id: impl Into<String>) -> Option<Self> {
        let s = id.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FeatureSetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Key of a Store Record and of a Cache Entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureKey {
    pub entity_id: EntityId,
    pub feature_set_id: FeatureSetId,
}

impl FeatureKey {
    pub fn new(entity_id: EntityId, feature_set_id: FeatureSetId) -> Self {
        Self {
            entity_id,
            feature_set_id,
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.feature_set_id)
    }
}
