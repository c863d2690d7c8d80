mod channels;
mod videos;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route("/channels/refresh", post(channels::refresh_all_channels))
        .route(
            "/channels/:channel_id",
            get(channels::get_channel)
                .patch(channels::patch_channel)
                .delete(channels::delete_channel),
        )
        .route("/channels/:channel_id/refresh", post(channels::refresh_channel))
        .route("/videos", get(videos::list_videos))
        .route("/videos/:video_id", get(videos::get_video))
        .route("/videos/:video_id/state", post(videos::mark_video_state))
        .route("/videos/:video_id/download", post(videos::download_video))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn health_check() -> &'static str {
    "OK"
}
