//! Raw interaction events
//!
//! Events are immutable once produced. Ordering is only defined per
//! entity: the partition delivery order is the processing order, and
//! `event_time` is only used for skew detection, never to reorder.

use crate::ids::{EntityId, EntityKind, EventId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of user interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    View,
    Like,
    #[serde(alias = "rating")]
    Rate,
    Search,
    Click,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::View,
        EventType::Like,
        EventType::Rate,
        EventType::Search,
        EventType::Click,
    ];

    /// Stable label used in counters and logs
    pub fn label(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Like => "like",
            EventType::Rate => "rate",
            EventType::Search => "search",
            EventType::Click => "click",
        }
    }

    /// Whether the event refers to a concrete item
    pub fn requires_item(&self) -> bool {
        !matches!(self, EventType::Search)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Event-specific attributes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InteractionPayload {
    /// Item (movie) the user interacted with
    #[serde(default)]
    pub item_id: Option<u64>,
    /// Explicit rating, only on `rate` events. Carried as a float on the
    /// wire so producers can send plain JSON numbers.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub rating: Option<Decimal>,
    /// Genres of the item, if the producer knows them
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl InteractionPayload {
    pub fn item(item_id: u64) -> Self {
        Self {
            item_id: Some(item_id),
            ..Default::default()
        }
    }

    pub fn rating(item_id: u64, rating: Decimal) -> Self {
        Self {
            item_id: Some(item_id),
            rating: Some(rating),
            ..Default::default()
        }
    }

    pub fn with_genres<I, S>(mut self, genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.genres = genres.into_iter().map(Into::into).collect();
        self
    }
}

/// Immutable interaction record flowing through the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    /// Ordering and partition key
    pub entity_id: EntityId,
    pub event_type: EventType,
    pub payload: InteractionPayload,
    /// When the interaction happened, Unix nanoseconds (producer clock)
    pub event_time: i64,
    /// When the platform accepted the event, Unix nanoseconds
    pub ingest_time: i64,
}

impl Event {
    pub fn new(
        entity_id: EntityId,
        event_type: EventType,
        payload: InteractionPayload,
        event_time: i64,
        ingest_time: i64,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            entity_id,
            event_type,
            payload,
            event_time,
            ingest_time,
        }
    }

    /// The same interaction keyed by its item, for item-level features.
    ///
    /// `None` for events without an item and for events already keyed by
    /// an item. The copy's id is derived from this event's id, so replays
    /// of one event are recognised on the item side too.
    pub fn for_item(&self) -> Option<Event> {
        if self.entity_id.kind() == EntityKind::Item {
            return None;
        }
        let item_id = self.payload.item_id?;
        Some(Event {
            event_id: self.event_id.item_copy(),
            entity_id: EntityId::item(item_id),
            event_type: self.event_type,
            payload: self.payload.clone(),
            event_time: self.event_time,
            ingest_time: self.ingest_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_accepts_rating_alias() {
        let parsed: EventType = serde_json::from_str("\"rating\"").unwrap();
        assert_eq!(parsed, EventType::Rate);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"rate\"");
    }

    #[test]
    fn test_search_has_no_item() {
        assert!(!EventType::Search.requires_item());
        assert!(EventType::Rate.requires_item());
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::new(
            EntityId::new("u1"),
            EventType::Rate,
            InteractionPayload::rating(10, Decimal::from(4)).with_genres(["Drama"]),
            1,
            2,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entity_id"], "u1");
        assert_eq!(json["event_type"], "rate");
        assert_eq!(json["payload"]["item_id"], 10);
        assert_eq!(json["payload"]["genres"][0], "Drama");
        assert_eq!(json["payload"]["rating"], 4.0);
        assert!(json["payload"]["session_id"].is_null());
    }

    #[test]
    fn test_item_copy_keyed_by_item() {
        let event = Event::new(
            EntityId::new("u1"),
            EventType::View,
            InteractionPayload::item(42).with_genres(["Drama"]),
            5,
            6,
        );
        let copy = event.for_item().unwrap();
        assert_eq!(copy.entity_id, EntityId::item(42));
        assert_eq!(copy.event_id, event.event_id.item_copy());
        assert_eq!(copy.payload, event.payload);
        assert_eq!((copy.event_time, copy.ingest_time), (5, 6));
        assert!(copy.for_item().is_none());
    }

    #[test]
    fn test_search_has_no_item_copy() {
        let event = Event::new(
            EntityId::new("u1"),
            EventType::Search,
            InteractionPayload::default(),
            1,
            1,
        );
        assert!(event.for_item().is_none());
    }

    #[test]
    fn test_payload_defaults_when_fields_missing() {
        let payload: InteractionPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(payload, InteractionPayload::default());
    }
}
