use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::models::IngestResponse;
use crate::state::AppState;
use crate::validation::IngestRequest;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::{debug, info};

/// Validation gate, then publish to the entity's partition and, for
/// item interactions, to the item's partition
pub async fn ingest_event(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), GatewayError> {
    let Json(request) = payload.map_err(|e| {
        state.metrics.record_rejection("malformed");
        GatewayError::BadRequest(e.body_text())
    })?;

    let event = match state.gate.validate(&request, state.clock.now_nanos()) {
        Ok(event) => event,
        Err(errors) => {
            for error in &errors {
                state.metrics.record_rejection(error.code());
            }
            info!(
                entity_id = request.entity_id.as_deref().unwrap_or(""),
                reasons = %errors.iter().map(|e| e.code()).collect::<Vec<_>>().join(","),
                "event rejected by validation gate"
            );
            return Err(GatewayError::Rejected(errors));
        }
    };

    let event_id = event.event_id;
    let entity_id = event.entity_id.clone();
    let item_copy = event.for_item();
    let published = state.bus.publish(event)?;

    // Item-level features consume the same interaction keyed by the item.
    // The copy's id is derived from the event id, so a client retry after
    // a failure here is de-duplicated on both sides.
    if let Some(copy) = item_copy {
        let item_id = copy.entity_id.clone();
        let item = state.bus.publish(copy)?;
        debug!(
            entity_id = %item_id,
            partition = item.partition,
            offset = item.offset,
            "item copy accepted"
        );
    }

    GatewayMetrics::incr(&state.metrics.events_accepted);
    debug!(
        entity_id = %entity_id,
        partition = published.partition,
        offset = published.offset,
        "event accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            event_id,
            partition: published.partition,
            offset: published.offset,
        }),
    ))
}
