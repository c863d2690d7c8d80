//! YouTube Data API v3 client.
//!
//! Quota-efficient: a channel refresh costs playlistItems.list (1 unit) plus
//! videos.list (1 unit per 50 videos) instead of search.list (100 units).

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::DateTime;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::Deserialize;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const PAGE_SIZE: usize = 50;
const LOOKUP_CHUNK_SIZE: usize = 50;

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("Channel {0} not found")]
    ChannelNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed record: {0}")]
    BadRecord(String),
}

/// One video as reported by the upstream provider.
#[derive(Debug, Clone)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub author_id: String,
    pub author_name: String,
    /// Publish time, epoch seconds.
    pub published: i64,
    pub duration: i64,
    pub views: Option<i64>,
    pub likes: Option<i64>,
    pub comments: Option<i64>,
    pub thumbnail: String,
    /// "upcoming" or "live" while a broadcast is scheduled or airing,
    /// None once it has concluded (or for plain uploads).
    pub live_broadcast: Option<String>,
}

/// The authoritative metadata provider consumed by the refresh engine.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn resolve_channel_name(&self, channel_id: &str) -> Result<String, UpstreamError>;

    async fn resolve_uploads_playlist(&self, channel_id: &str) -> Result<String, UpstreamError>;

    /// All videos of an uploads playlist, newest first, paginated
    /// internally. Restartable: every call walks from the top.
    fn list_playlist_videos(
        &self,
        playlist_id: &str,
    ) -> BoxStream<'static, Result<VideoRecord, UpstreamError>>;

    /// Batch lookup by id, chunked internally. Result order is not
    /// guaranteed to match the input; ids that do not resolve are omitted.
    fn get_videos(&self, ids: Vec<String>)
        -> BoxStream<'static, Result<VideoRecord, UpstreamError>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    snippet: Option<ChannelSnippet>,
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemContentDetails {
    video_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    snippet: Option<VideoSnippet>,
    content_details: Option<ContentDetails>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    published_at: String,
    channel_id: String,
    channel_title: String,
    title: String,
    description: String,
    #[serde(default)]
    thumbnails: HashMap<String, Thumbnail>,
    live_broadcast_content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thumbnail {
    url: String,
    width: Option<i64>,
    height: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

#[derive(Clone)]
pub struct YoutubeClient {
    http_client: Client,
    api_key: String,
}

impl YoutubeClient {
    pub fn new(api_key: String) -> Self {
        YoutubeClient {
            http_client: Client::new(),
            api_key,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, UpstreamError> {
        let url = format!("{API_BASE}/{path}");
        let response = self
            .http_client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Api { status, message });
        }

        Ok(response.json().await?)
    }

    /// One page of an uploads playlist: resolved records (newest first
    /// within the page), the number of playlist entries in the page, and
    /// the next page token.
    async fn playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<(Vec<VideoRecord>, usize, Option<String>), UpstreamError> {
        let max_results = PAGE_SIZE.to_string();
        let mut query = vec![
            ("part", "contentDetails"),
            ("playlistId", playlist_id),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let data: PlaylistItemsResponse = self.get_json("playlistItems", &query).await?;
        let entry_count = data.items.len();
        let ids: Vec<String> = data
            .items
            .into_iter()
            .map(|item| item.content_details.video_id)
            .collect();

        let mut records = self.videos_by_ids(&ids).await?;
        records.sort_by(|a, b| b.published.cmp(&a.published));
        Ok((records, entry_count, data.next_page_token))
    }

    async fn videos_by_ids(&self, ids: &[String]) -> Result<Vec<VideoRecord>, UpstreamError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_param = ids.join(",");
        let data: VideoListResponse = self
            .get_json(
                "videos",
                &[("part", "snippet,contentDetails,statistics"), ("id", &id_param)],
            )
            .await?;

        let mut records = Vec::with_capacity(data.items.len());
        for item in data.items {
            if let Some(record) = to_record(item)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Upstream for YoutubeClient {
    async fn resolve_channel_name(&self, channel_id: &str) -> Result<String, UpstreamError> {
        let data: ChannelListResponse = self
            .get_json("channels", &[("part", "snippet"), ("id", channel_id)])
            .await?;
        data.items
            .into_iter()
            .next()
            .and_then(|item| item.snippet)
            .map(|snippet| snippet.title)
            .ok_or_else(|| UpstreamError::ChannelNotFound(channel_id.to_string()))
    }

    async fn resolve_uploads_playlist(&self, channel_id: &str) -> Result<String, UpstreamError> {
        let data: ChannelListResponse = self
            .get_json("channels", &[("part", "contentDetails"), ("id", channel_id)])
            .await?;
        data.items
            .into_iter()
            .next()
            .and_then(|item| item.content_details)
            .and_then(|details| details.related_playlists.uploads)
            .ok_or_else(|| UpstreamError::ChannelNotFound(channel_id.to_string()))
    }

    fn list_playlist_videos(
        &self,
        playlist_id: &str,
    ) -> BoxStream<'static, Result<VideoRecord, UpstreamError>> {
        struct PageWalk {
            client: YoutubeClient,
            playlist_id: String,
            page_token: Option<String>,
            buffer: VecDeque<VideoRecord>,
            done: bool,
        }

        let walk = PageWalk {
            client: self.clone(),
            playlist_id: playlist_id.to_string(),
            page_token: None,
            buffer: VecDeque::new(),
            done: false,
        };

        stream::try_unfold(walk, |mut walk| async move {
            loop {
                if let Some(record) = walk.buffer.pop_front() {
                    return Ok(Some((record, walk)));
                }
                if walk.done {
                    return Ok(None);
                }
                let (records, entry_count, next_token) = walk
                    .client
                    .playlist_page(&walk.playlist_id, walk.page_token.as_deref())
                    .await?;
                walk.done = next_token.is_none() || entry_count < PAGE_SIZE;
                walk.page_token = next_token;
                walk.buffer.extend(records);
            }
        })
        .boxed()
    }

    fn get_videos(
        &self,
        ids: Vec<String>,
    ) -> BoxStream<'static, Result<VideoRecord, UpstreamError>> {
        struct BatchWalk {
            client: YoutubeClient,
            chunks: VecDeque<Vec<String>>,
            buffer: VecDeque<VideoRecord>,
        }

        let walk = BatchWalk {
            client: self.clone(),
            chunks: ids.chunks(LOOKUP_CHUNK_SIZE).map(|chunk| chunk.to_vec()).collect(),
            buffer: VecDeque::new(),
        };

        stream::try_unfold(walk, |mut walk| async move {
            loop {
                if let Some(record) = walk.buffer.pop_front() {
                    return Ok(Some((record, walk)));
                }
                let Some(chunk) = walk.chunks.pop_front() else {
                    return Ok(None);
                };
                let records = walk.client.videos_by_ids(&chunk).await?;
                walk.buffer.extend(records);
            }
        })
        .boxed()
    }
}

/// Items without a snippet (deleted mid-flight) are skipped, matching the
/// "unresolvable ids are omitted" contract.
fn to_record(item: VideoItem) -> Result<Option<VideoRecord>, UpstreamError> {
    let Some(snippet) = item.snippet else {
        return Ok(None);
    };

    let published = DateTime::parse_from_rfc3339(&snippet.published_at)
        .map_err(|error| {
            UpstreamError::BadRecord(format!(
                "video {}: bad publishedAt {:?}: {error}",
                item.id, snippet.published_at
            ))
        })?
        .timestamp();

    let duration = item
        .content_details
        .as_ref()
        .map(|details| parse_duration(&details.duration))
        .transpose()?
        .unwrap_or(0);

    let views = item
        .statistics
        .as_ref()
        .and_then(|stats| stats.view_count.as_ref())
        .and_then(|count| count.parse().ok());
    let likes = item
        .statistics
        .as_ref()
        .and_then(|stats| stats.like_count.as_ref())
        .and_then(|count| count.parse().ok());
    let comments = item
        .statistics
        .as_ref()
        .and_then(|stats| stats.comment_count.as_ref())
        .and_then(|count| count.parse().ok());

    let live_broadcast = snippet
        .live_broadcast_content
        .filter(|token| token != "none");

    Ok(Some(VideoRecord {
        id: item.id,
        title: snippet.title,
        description: snippet.description,
        author_id: snippet.channel_id,
        author_name: snippet.channel_title,
        published,
        duration,
        views,
        likes,
        comments,
        thumbnail: best_thumbnail(&snippet.thumbnails),
        live_broadcast,
    }))
}

/// Largest thumbnail by pixel area.
fn best_thumbnail(thumbnails: &HashMap<String, Thumbnail>) -> String {
    thumbnails
        .values()
        .max_by_key(|thumb| thumb.width.unwrap_or(0) * thumb.height.unwrap_or(0))
        .map(|thumb| thumb.url.clone())
        .unwrap_or_default()
}

/// ISO-8601 durations as YouTube emits them, e.g. "PT1H2M3S".
fn parse_duration(duration: &str) -> Result<i64, UpstreamError> {
    let digits = duration.trim_start_matches("PT");

    let mut total_seconds = 0i64;
    let mut current_number = String::new();

    for character in digits.chars() {
        if character.is_ascii_digit() {
            current_number.push(character);
        } else {
            let number: i64 = current_number.parse().map_err(|_| {
                UpstreamError::BadRecord(format!("bad duration {duration:?}"))
            })?;
            match character {
                'H' => total_seconds += number * 3600,
                'M' => total_seconds += number * 60,
                'S' => total_seconds += number,
                _ => {}
            }
            current_number.clear();
        }
    }

    Ok(total_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_handles_full_form() {
        assert_eq!(parse_duration("PT1H2M3S").unwrap(), 3723);
        assert_eq!(parse_duration("PT4M20S").unwrap(), 260);
        assert_eq!(parse_duration("PT45S").unwrap(), 45);
        assert_eq!(parse_duration("PT0S").unwrap(), 0);
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("PTXS").is_err());
    }

    #[test]
    fn best_thumbnail_picks_largest_area() {
        let thumbnails: HashMap<String, Thumbnail> = serde_json::from_value(serde_json::json!({
            "default": {"url": "small", "width": 120, "height": 90},
            "maxres": {"url": "big", "width": 1280, "height": 720},
            "medium": {"url": "mid", "width": 320, "height": 180},
        }))
        .unwrap();
        assert_eq!(best_thumbnail(&thumbnails), "big");
    }

    #[test]
    fn to_record_maps_live_broadcast_none_to_null() {
        let item: VideoItem = serde_json::from_value(serde_json::json!({
            "id": "v1",
            "snippet": {
                "publishedAt": "2024-05-01T10:00:00Z",
                "channelId": "UC1",
                "channelTitle": "someone",
                "title": "a video",
                "description": "",
                "thumbnails": {},
                "liveBroadcastContent": "none"
            },
            "contentDetails": {"duration": "PT1M"},
            "statistics": {"viewCount": "12"}
        }))
        .unwrap();
        let record = to_record(item).unwrap().unwrap();
        assert_eq!(record.live_broadcast, None);
        assert_eq!(record.duration, 60);
        assert_eq!(record.views, Some(12));

        let item: VideoItem = serde_json::from_value(serde_json::json!({
            "id": "v2",
            "snippet": {
                "publishedAt": "2024-05-01T10:00:00Z",
                "channelId": "UC1",
                "channelTitle": "someone",
                "title": "a premiere",
                "description": "",
                "thumbnails": {},
                "liveBroadcastContent": "upcoming"
            }
        }))
        .unwrap();
        let record = to_record(item).unwrap().unwrap();
        assert_eq!(record.live_broadcast.as_deref(), Some("upcoming"));
    }

    #[test]
    fn snippetless_item_is_omitted() {
        let item: VideoItem =
            serde_json::from_value(serde_json::json!({"id": "gone"})).unwrap();
        assert!(to_record(item).unwrap().is_none());
    }
}
