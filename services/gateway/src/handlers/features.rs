use crate::error::GatewayError;
use crate::models::{FeatureQuery, FeatureResponse};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use types::ids::{EntityId, FeatureKey, FeatureSetId};
use types::policy::FreshnessPolicy;

fn feature_key(entity_id: String, feature_set: String) -> Result<FeatureKey, GatewayError> {
    let entity_id = EntityId::try_new(entity_id)
        .ok_or_else(|| GatewayError::BadRequest("entity_id must not be empty".into()))?;
    let feature_set = FeatureSetId::try_new(feature_set)
        .ok_or_else(|| GatewayError::BadRequest("feature_set must not be empty".into()))?;
    Ok(FeatureKey::new(entity_id, feature_set))
}

pub async fn get_features(
    State(state): State<AppState>,
    Path((entity_id, feature_set)): Path<(String, String)>,
    Query(query): Query<FeatureQuery>,
) -> Result<Json<FeatureResponse>, GatewayError> {
    let key = feature_key(entity_id, feature_set)?;
    let policy = match query.freshness.as_deref() {
        Some(raw) => raw.parse::<FreshnessPolicy>().map_err(GatewayError::BadRequest)?,
        None => FreshnessPolicy::default(),
    };

    let resolution = state.resolver.resolve(&key, policy).await?;
    FeatureResponse::from_resolution(resolution)
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(key.to_string()))
}

/// Point-in-time read of an exact version
pub async fn get_feature_version(
    State(state): State<AppState>,
    Path((entity_id, feature_set, version)): Path<(String, String, u64)>,
) -> Result<Json<FeatureResponse>, GatewayError> {
    let key = feature_key(entity_id, feature_set)?;

    state
        .resolver
        .resolve_as_of(&key, version)
        .await?
        .map(|record| Json(FeatureResponse::from_record(record)))
        .ok_or_else(|| GatewayError::NotFound(format!("{key}@{version}")))
}
