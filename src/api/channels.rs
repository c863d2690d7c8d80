use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::{Engine, NewChannel};
use crate::errors::AppError;
use crate::models::Channel;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshQuery {
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_true")]
    pub rss_assisted: bool,
    #[serde(default)]
    pub skip_failures: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResponse {
    #[serde(flatten)]
    pub channel: Channel,
    pub has_pending: bool,
}

/// Fields absent from the patch are left alone; an empty string clears a
/// nullable override.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchChannelRequest {
    pub name: Option<String>,
    pub automark: Option<String>,
    pub autorefresh: Option<bool>,
    pub download_directory: Option<String>,
    pub queuefile_extension: Option<String>,
}

pub async fn list_channels(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<Vec<Channel>>, AppError> {
    let channels = engine.get_channels().await?;
    Ok(Json(channels))
}

pub async fn create_channel(
    State(engine): State<Arc<Engine>>,
    Json(payload): Json<NewChannel>,
) -> Result<Json<Channel>, AppError> {
    let channel = engine.add_channel(payload).await?;
    Ok(Json(channel))
}

pub async fn get_channel(
    State(engine): State<Arc<Engine>>,
    Path(channel_id): Path<String>,
) -> Result<Json<ChannelResponse>, AppError> {
    let channel = engine.get_channel(&channel_id).await?;
    let has_pending = engine.channel_has_pending(&channel_id).await?;
    Ok(Json(ChannelResponse {
        channel,
        has_pending,
    }))
}

pub async fn patch_channel(
    State(engine): State<Arc<Engine>>,
    Path(channel_id): Path<String>,
    Json(payload): Json<PatchChannelRequest>,
) -> Result<Json<Channel>, AppError> {
    if let Some(name) = &payload.name {
        engine.set_name(&channel_id, name).await?;
    }
    if let Some(automark) = &payload.automark {
        engine.set_automark(&channel_id, automark).await?;
    }
    if let Some(autorefresh) = payload.autorefresh {
        engine.set_autorefresh(&channel_id, autorefresh).await?;
    }
    if let Some(directory) = &payload.download_directory {
        let value = (!directory.is_empty()).then_some(directory.as_str());
        engine.set_download_directory(&channel_id, value).await?;
    }
    if let Some(extension) = &payload.queuefile_extension {
        let value = (!extension.is_empty()).then_some(extension.as_str());
        engine.set_queuefile_extension(&channel_id, value).await?;
    }

    let channel = engine.get_channel(&channel_id).await?;
    Ok(Json(channel))
}

pub async fn delete_channel(
    State(engine): State<Arc<Engine>>,
    Path(channel_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    engine.delete_channel(&channel_id).await?;
    Ok(Json(json!({ "deleted": channel_id })))
}

pub async fn refresh_channel(
    State(engine): State<Arc<Engine>>,
    Path(channel_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<Value>, AppError> {
    engine
        .refresh_channel(&channel_id, query.force, query.rss_assisted)
        .await?;
    Ok(Json(json!({ "refreshed": channel_id })))
}

pub async fn refresh_all_channels(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<Value>, AppError> {
    let failures = engine
        .refresh_all_channels(query.force, query.rss_assisted, query.skip_failures)
        .await?;
    let failures: Vec<Value> = failures
        .iter()
        .map(|failure| {
            json!({
                "channelId": failure.channel_id,
                "error": failure.error.to_string(),
            })
        })
        .collect();
    Ok(Json(json!({ "failures": failures })))
}
