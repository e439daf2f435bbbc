//! Validation gate in front of the event bus
//!
//! Producers post loosely typed JSON. The gate checks it, reports every
//! problem at once with stable reason codes, and only then builds the typed
//! [`Event`] that is published.

use feature_engine::validation::check_payload;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use types::errors::ValidationError;
use types::event::{Event, EventType, InteractionPayload};
use types::ids::{EntityId, EventId};
use types::time::NANOS_PER_SEC;

/// 1995-01-01T00:00:00Z, the earliest interaction the catalogue knows about
pub const MIN_TIMESTAMP_SECS: i64 = 788_918_400;

/// Raw interaction as posted by a producer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub item_id: Option<i64>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub rating: Option<Decimal>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Producer-assigned id; kept across retries so the engine can spot
    /// redelivery
    #[serde(default)]
    pub event_id: Option<EventId>,
}

/// Accept/reject decision for a raw event
pub trait ValidationGate: Send + Sync {
    fn validate(&self, request: &IngestRequest, now_nanos: i64)
    -> Result<Event, Vec<ValidationError>>;
}

#[derive(Debug, Clone)]
pub struct InteractionValidator {
    /// How far ahead of the gateway clock an event may be stamped
    pub future_tolerance: Duration,
    pub min_timestamp_secs: i64,
}

impl Default for InteractionValidator {
    fn default() -> Self {
        Self {
            future_tolerance: Duration::from_secs(60),
            min_timestamp_secs: MIN_TIMESTAMP_SECS,
        }
    }
}

impl InteractionValidator {
    fn check_timestamp(&self, secs: i64, now_nanos: i64) -> Result<i64, ValidationError> {
        if secs < self.min_timestamp_secs {
            return Err(ValidationError::TimestampTooOld(secs));
        }
        let event_time = secs
            .checked_mul(NANOS_PER_SEC)
            .ok_or_else(|| ValidationError::Malformed(format!("timestamp {secs} out of range")))?;
        let tolerance_secs = self.future_tolerance.as_secs() as i64;
        if event_time > now_nanos.saturating_add(tolerance_secs * NANOS_PER_SEC) {
            return Err(ValidationError::TimestampInFuture {
                event_time: secs,
                tolerance_secs,
            });
        }
        Ok(event_time)
    }
}

impl ValidationGate for InteractionValidator {
    fn validate(
        &self,
        request: &IngestRequest,
        now_nanos: i64,
    ) -> Result<Event, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let entity_id = match request.entity_id.as_deref().map(str::trim) {
            Some(id) => EntityId::try_new(id),
            None => None,
        };
        if entity_id.is_none() {
            errors.push(ValidationError::MissingField("entity_id"));
        }

        let event_type = match request.event_type.as_deref() {
            Some(raw) => {
                let parsed = parse_event_type(raw);
                if parsed.is_none() {
                    errors.push(ValidationError::UnknownEventType(raw.to_string()));
                }
                parsed
            }
            None => {
                errors.push(ValidationError::MissingField("event_type"));
                None
            }
        };

        let event_time = match request.timestamp {
            Some(secs) => self
                .check_timestamp(secs, now_nanos)
                .map_err(|e| errors.push(e))
                .ok(),
            None => {
                errors.push(ValidationError::MissingField("timestamp"));
                None
            }
        };

        let item_id = match request.item_id {
            Some(id) if id < 0 => {
                errors.push(ValidationError::NegativeId {
                    field: "item_id",
                    value: id,
                });
                None
            }
            Some(id) => Some(id as u64),
            None => None,
        };

        let (Some(entity_id), Some(event_type), Some(event_time)) =
            (entity_id, event_type, event_time)
        else {
            return Err(errors);
        };

        let payload = InteractionPayload {
            item_id,
            rating: request.rating,
            genres: request.genres.clone(),
            session_id: request.session_id.clone(),
        };
        let mut event = Event::new(entity_id, event_type, payload, event_time, now_nanos);
        if let Some(event_id) = request.event_id {
            event.event_id = event_id;
        }

        // A negative item id was already reported; don't also call it missing
        if let Err(e) = check_payload(&event) {
            if !(request.item_id.is_some() && e == ValidationError::MissingField("item_id")) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(event)
        } else {
            Err(errors)
        }
    }
}

fn parse_event_type(raw: &str) -> Option<EventType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "view" => Some(EventType::View),
        "like" => Some(EventType::Like),
        "rate" | "rating" => Some(EventType::Rate),
        "search" => Some(EventType::Search),
        "click" => Some(EventType::Click),
        _ => None,
    }
}
