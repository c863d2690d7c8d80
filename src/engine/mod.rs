//! The refresh/ingestion engine: one service struct owning the store, the
//! upstream provider, the feed probe, and the identity caches. Everything
//! the front ends can do goes through here.

mod channels;
mod videos;


use std::sync::{Arc, Mutex};
use std::time::Instant;

use sqlx::Row;

use crate::cache::EntityCache;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Channel, Video};
use crate::store::{Arg, Store};
use crate::youtube::{FeedProbe, Upstream, UpstreamError};

pub use channels::{NewChannel, RefreshFailure};

/// Result of the feed-assisted "what's new" probe. `NeedsFullRefresh` is
/// not an error: it routes the caller onto the authoritative listing.
pub(crate) enum AssistOutcome {
    Fresh(Vec<String>),
    NeedsFullRefresh(String),
}

pub struct Engine {
    pub(crate) store: Store,
    pub(crate) youtube: Arc<dyn Upstream>,
    pub(crate) feeds: Arc<dyn FeedProbe>,
    pub(crate) config: Config,
    channels: EntityCache<Channel>,
    videos: EntityCache<Video>,
    last_refresh: Mutex<Instant>,
}

impl Engine {
    pub fn new(
        store: Store,
        youtube: Arc<dyn Upstream>,
        feeds: Arc<dyn FeedProbe>,
        config: Config,
    ) -> Self {
        Engine {
            store,
            youtube,
            feeds,
            channels: EntityCache::new(config.channel_cache_size),
            videos: EntityCache::new(config.video_cache_size),
            config,
            last_refresh: Mutex::new(Instant::now()),
        }
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel, AppError> {
        if let Some(channel) = self.channels.get(channel_id) {
            return Ok(channel);
        }
        let row = self
            .store
            .fetch_optional("SELECT * FROM channels WHERE id = ?", &[Arg::from(channel_id)])
            .await?;
        match row {
            Some(row) => {
                let channel = Channel::from_row(&row)?;
                self.channels.put(channel_id, channel.clone());
                Ok(channel)
            }
            None => Err(AppError::NoSuchChannel(channel_id.to_string())),
        }
    }

    pub async fn get_video(&self, video_id: &str) -> Result<Video, AppError> {
        if let Some(video) = self.videos.get(video_id) {
            return Ok(video);
        }
        let row = self
            .store
            .fetch_optional("SELECT * FROM videos WHERE id = ?", &[Arg::from(video_id)])
            .await?;
        match row {
            Some(row) => {
                let video = Video::from_row(&row)?;
                self.videos.put(video_id, video.clone());
                Ok(video)
            }
            None => Err(AppError::NoSuchVideo(video_id.to_string())),
        }
    }

    pub(crate) fn cache_channel(&self, channel: &Channel) {
        self.channels.put(&channel.id, channel.clone());
    }

    pub(crate) fn cache_video(&self, video: &Video) {
        self.videos.put(&video.id, video.clone());
    }

    pub(crate) fn uncache_channel(&self, channel_id: &str) {
        self.channels.remove(channel_id);
    }

    pub(crate) fn uncache_video(&self, video_id: &str) {
        self.videos.remove(video_id);
    }

    /// Return a cached instance for this row's id if one exists, otherwise
    /// decode, cache, and return. The cached copy wins: write-through keeps
    /// it at least as fresh as the row.
    pub(crate) fn channel_from_row_cached(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<Channel, AppError> {
        let id: String = row.try_get("id").map_err(crate::store::StoreError::Sqlx)?;
        if let Some(cached) = self.channels.get(&id) {
            return Ok(cached);
        }
        let channel = Channel::from_row(row)?;
        self.cache_channel(&channel);
        Ok(channel)
    }

    pub(crate) fn video_from_row_cached(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<Video, AppError> {
        let id: String = row.try_get("id").map_err(crate::store::StoreError::Sqlx)?;
        if let Some(cached) = self.videos.get(&id) {
            return Ok(cached);
        }
        let video = Video::from_row(row)?;
        self.cache_video(&video);
        Ok(video)
    }

    /// Commit on success, roll back on failure. When the rollback closes the
    /// outermost transaction both caches are dropped, so no copy of a
    /// rolled-back write survives.
    pub(crate) async fn finish<T>(&self, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => match self.store.commit().await {
                Ok(()) => Ok(value),
                Err(commit_error) => {
                    if !self.store.in_transaction().await {
                        self.channels.clear();
                        self.videos.clear();
                    }
                    Err(commit_error.into())
                }
            },
            Err(error) => {
                if let Err(rollback_error) = self.store.rollback().await {
                    tracing::error!(%rollback_error, "Rollback failed");
                }
                if !self.store.in_transaction().await {
                    self.channels.clear();
                    self.videos.clear();
                }
                Err(error)
            }
        }
    }

    pub(crate) fn wrap_refresh(&self, channel_id: &str, source: UpstreamError) -> AppError {
        AppError::ChannelRefresh {
            channel_id: channel_id.to_string(),
            source,
        }
    }

    /// Stamp the time of the latest completed refresh. The background
    /// poller re-arms from this, so a manual refresh postpones the next
    /// automatic one.
    pub(crate) fn note_refresh(&self) {
        *self.last_refresh.lock().unwrap() = Instant::now();
    }

    pub fn seconds_since_refresh(&self) -> u64 {
        self.last_refresh.lock().unwrap().elapsed().as_secs()
    }
}
