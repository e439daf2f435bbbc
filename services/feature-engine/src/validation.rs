//! Local event invariants
//!
//! The ingestion gate validates events before they are published; the engine
//! re-checks the invariants its derivations depend on so a malformed event
//! can never reach an aggregate.

use rust_decimal::Decimal;
use types::errors::ValidationError;
use types::event::{Event, EventType};

/// Lowest accepted rating
pub const MIN_RATING: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
/// Highest accepted rating
pub const MAX_RATING: Decimal = Decimal::from_parts(50, 0, 0, false, 1);
/// Ratings move in half-star steps
pub const RATING_STEP: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Check that a rating is inside the scale and on a half-star step
pub fn check_rating(rating: Decimal) -> Result<(), ValidationError> {
    if rating < MIN_RATING || rating > MAX_RATING {
        return Err(ValidationError::RatingOutOfRange {
            rating: rating.to_string(),
            min: MIN_RATING.to_string(),
            max: MAX_RATING.to_string(),
        });
    }
    if !(rating % RATING_STEP).is_zero() {
        return Err(ValidationError::RatingStep(rating.to_string()));
    }
    Ok(())
}

/// Payload invariants per event type
pub fn check_payload(event: &Event) -> Result<(), ValidationError> {
    if event.event_type.requires_item() && event.payload.item_id.is_none() {
        return Err(ValidationError::MissingField("item_id"));
    }

    match (event.event_type, event.payload.rating) {
        (EventType::Rate, Some(rating)) => check_rating(rating),
        (EventType::Rate, None) => Err(ValidationError::MissingField("rating")),
        (_, Some(rating)) => Err(ValidationError::UnexpectedRating(rating.to_string())),
        (_, None) => Ok(()),
    }
}
