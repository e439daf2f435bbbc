use crate::resolver::{Resolution, Source};
use serde::{Deserialize, Serialize};
use types::errors::DegradedReason;
use types::feature::{FeatureValues, FeatureVector, Timeliness};
use types::ids::{EntityId, EventId, FeatureSetId};
use types::record::StoreRecord;
use types::time::format_nanos;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureQuery {
    /// `best_effort` (default) or `strict`
    #[serde(default)]
    pub freshness: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedStatus {
    Fresh,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureResponse {
    pub entity_id: EntityId,
    pub feature_set_id: FeatureSetId,
    pub version: u64,
    pub values: FeatureValues,
    pub computed_at: String,
    pub timeliness: Timeliness,
    pub status: ServedStatus,
    pub source: Option<Source>,
    pub degraded_reason: Option<DegradedReason>,
    pub staleness_ms: Option<u64>,
}

impl FeatureResponse {
    fn fresh(vector: FeatureVector, source: Source) -> Self {
        Self {
            entity_id: vector.entity_id,
            feature_set_id: vector.feature_set_id,
            version: vector.version,
            values: vector.values,
            computed_at: format_nanos(vector.computed_at),
            timeliness: vector.timeliness,
            status: ServedStatus::Fresh,
            source: Some(source),
            degraded_reason: None,
            staleness_ms: None,
        }
    }

    /// `None` for [`Resolution::NotFound`]
    pub fn from_resolution(resolution: Resolution) -> Option<Self> {
        match resolution {
            Resolution::Found { vector, source } => Some(Self::fresh(vector, source)),
            Resolution::NotFound => None,
            Resolution::Degraded {
                vector,
                staleness,
                reason,
            } => {
                let mut response = Self::fresh(vector, Source::Store);
                response.status = ServedStatus::Degraded;
                response.source = None;
                response.degraded_reason = Some(reason);
                response.staleness_ms = Some(staleness.as_millis() as u64);
                Some(response)
            }
        }
    }

    pub fn from_record(record: StoreRecord) -> Self {
        Self::fresh(record.vector, Source::Store)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub event_id: EventId,
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub bus_available: bool,
    pub store_available: bool,
    pub cache_available: bool,
    pub partitions: u32,
}
