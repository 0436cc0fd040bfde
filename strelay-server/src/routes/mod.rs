use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod health;
pub mod materialize;
pub mod relay;

pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/relay/playlist", get(relay::relay_playlist))
        .route("/relay/segment", get(relay::relay_segment))
        .route("/materialize/{episode_id}", get(materialize::materialize))
        .route(
            "/materialize/status/{episode_id}",
            get(materialize::status),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}
