use crate::handlers::{events, features, health};
use crate::rate_limit;
use crate::state::AppState;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/features/{entity_id}/{feature_set}",
            get(features::get_features),
        )
        .route(
            "/features/{entity_id}/{feature_set}/versions/{version}",
            get(features::get_feature_version),
        )
        .route("/events", post(events::ingest_event))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .nest("/v1", api_routes)
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
