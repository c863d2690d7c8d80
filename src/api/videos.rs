use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::Engine;
use crate::errors::AppError;
use crate::models::{Video, VideoState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoQuery {
    pub channel_id: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkStateRequest {
    pub state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn list_videos(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<VideoQuery>,
) -> Result<Json<Vec<Video>>, AppError> {
    let state = query
        .state
        .as_deref()
        .map(VideoState::try_from)
        .transpose()?;
    let videos = engine.get_videos(query.channel_id.as_deref(), state).await?;
    Ok(Json(videos))
}

pub async fn get_video(
    State(engine): State<Arc<Engine>>,
    Path(video_id): Path<String>,
) -> Result<Json<Video>, AppError> {
    let video = engine.get_video(&video_id).await?;
    Ok(Json(video))
}

pub async fn mark_video_state(
    State(engine): State<Arc<Engine>>,
    Path(video_id): Path<String>,
    Json(payload): Json<MarkStateRequest>,
) -> Result<Json<Video>, AppError> {
    let video = engine.mark_video_state(&video_id, &payload.state).await?;
    Ok(Json(video))
}

pub async fn download_video(
    State(engine): State<Arc<Engine>>,
    Path(video_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Json<Value>, AppError> {
    engine.download_video(&video_id, None, None, query.force).await?;
    Ok(Json(json!({ "queued": video_id })))
}
