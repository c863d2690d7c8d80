//! Video operations: listing, state transitions, single-record ingestion,
//! and download queuing.

use std::path::PathBuf;

use crate::engine::Engine;
use crate::errors::AppError;
use crate::models::{Channel, Video, VideoState};
use crate::store::Arg;
use crate::youtube::VideoRecord;

pub(crate) struct IngestOutcome {
    pub video: Video,
    /// True for a previously unknown video, and exactly once more for a
    /// premiere/livestream whose broadcast just concluded.
    pub new: bool,
}

impl Engine {
    /// Videos, optionally filtered by channel and/or state, newest first.
    pub async fn get_videos(
        &self,
        channel_id: Option<&str>,
        state: Option<VideoState>,
    ) -> Result<Vec<Video>, AppError> {
        let mut conditions = Vec::new();
        let mut args = Vec::new();
        if let Some(channel_id) = channel_id {
            conditions.push("author_id = ?");
            args.push(Arg::from(channel_id));
        }
        if let Some(state) = state {
            conditions.push("state = ?");
            args.push(Arg::from(state.as_str()));
        }

        let mut sql = String::from("SELECT * FROM videos");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY published DESC");

        let rows = self.store.fetch_all(&sql, &args).await?;
        rows.iter().map(|row| self.video_from_row_cached(row)).collect()
    }

    pub async fn mark_video_state(&self, video_id: &str, state: &str) -> Result<Video, AppError> {
        let state = VideoState::try_from(state)?;
        self.store.begin().await?;
        let result = self.mark_video_state_inner(video_id, state).await;
        self.finish(result).await
    }

    pub(crate) async fn mark_video_state_inner(
        &self,
        video_id: &str,
        state: VideoState,
    ) -> Result<Video, AppError> {
        let mut video = self.get_video(video_id).await?;
        self.store
            .update(
                "videos",
                &[("id", Arg::from(video_id)), ("state", Arg::from(state.as_str()))],
                "id",
            )
            .await?;
        video.state = state;
        self.cache_video(&video);
        Ok(video)
    }

    /// Reconcile one upstream record against the store.
    ///
    /// An unknown author gets a minimal channel row (automark pending) and
    /// no video backfill. An existing video keeps its state while every
    /// descriptive field is overwritten with upstream values.
    pub(crate) async fn ingest_video(
        &self,
        record: &VideoRecord,
    ) -> Result<IngestOutcome, AppError> {
        match self.get_channel(&record.author_id).await {
            Ok(_) => {}
            Err(AppError::NoSuchChannel(_)) => {
                let channel = Channel {
                    id: record.author_id.clone(),
                    name: record.author_name.clone(),
                    uploads_playlist: None,
                    download_directory: None,
                    queuefile_extension: None,
                    automark: VideoState::Pending,
                    autorefresh: true,
                };
                self.insert_channel_row(&channel).await?;
                tracing::debug!(
                    "Auto-created channel {} for video {}",
                    record.author_id,
                    record.id
                );
            }
            Err(error) => return Err(error),
        }

        let existing = match self.get_video(&record.id).await {
            Ok(video) => Some(video),
            Err(AppError::NoSuchVideo(_)) => None,
            Err(error) => return Err(error),
        };

        let state = existing
            .as_ref()
            .map(|video| video.state)
            .unwrap_or(VideoState::Pending);
        let new = match &existing {
            None => true,
            // A broadcast that just concluded counts as freshly arrived.
            Some(video) => video.live_broadcast.is_some() && record.live_broadcast.is_none(),
        };

        let pairs = [
            ("id", Arg::from(record.id.as_str())),
            ("published", Arg::from(record.published)),
            ("author_id", Arg::from(record.author_id.as_str())),
            ("title", Arg::from(record.title.as_str())),
            ("description", Arg::from(record.description.as_str())),
            ("duration", Arg::from(record.duration)),
            ("views", Arg::from(record.views)),
            ("thumbnail", Arg::from(record.thumbnail.as_str())),
            ("live_broadcast", Arg::from(record.live_broadcast.clone())),
            ("state", Arg::from(state.as_str())),
        ];
        if existing.is_some() {
            self.store.update("videos", &pairs, "id").await?;
        } else {
            self.store.insert("videos", &pairs).await?;
        }

        let video = Video {
            id: record.id.clone(),
            published: record.published,
            author_id: record.author_id.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
            duration: record.duration,
            views: record.views,
            thumbnail: record.thumbnail.clone(),
            live_broadcast: record.live_broadcast.clone(),
            state,
        };
        self.cache_video(&video);
        Ok(IngestOutcome { video, new })
    }

    /// Ingest, then apply the owning channel's automark policy to new
    /// arrivals. A broadcast still in progress is never auto-downloaded; it
    /// becomes eligible on the refresh after it concludes.
    pub(crate) async fn ingest_and_automark(
        &self,
        record: &VideoRecord,
    ) -> Result<IngestOutcome, AppError> {
        let outcome = self.ingest_video(record).await?;
        if !outcome.new {
            return Ok(outcome);
        }

        let channel = self.get_channel(&outcome.video.author_id).await?;
        match channel.automark {
            VideoState::Pending => {}
            VideoState::Downloaded => {
                if outcome.video.live_broadcast.is_none() {
                    self.download_video_inner(&outcome.video.id, None, None, false).await?;
                }
            }
            VideoState::Ignored => {
                self.mark_video_state_inner(&outcome.video.id, VideoState::Ignored).await?;
            }
        }

        let video = self.get_video(&outcome.video.id).await?;
        Ok(IngestOutcome {
            video,
            new: outcome.new,
        })
    }

    /// Queue a download request: a zero-length `{video_id}.{extension}`
    /// marker created in the resolved directory once the enclosing
    /// transaction commits. A video that is not pending is left alone
    /// unless forced.
    pub async fn download_video(
        &self,
        video_id: &str,
        directory: Option<&str>,
        extension: Option<&str>,
        force: bool,
    ) -> Result<(), AppError> {
        self.store.begin().await?;
        let result = self.download_video_inner(video_id, directory, extension, force).await;
        self.finish(result).await
    }

    pub(crate) async fn download_video_inner(
        &self,
        video_id: &str,
        directory: Option<&str>,
        extension: Option<&str>,
        force: bool,
    ) -> Result<(), AppError> {
        let video = self.get_video(video_id).await?;
        if video.state != VideoState::Pending && !force {
            tracing::debug!("{} does not need to be downloaded", video_id);
            return Ok(());
        }

        let channel = match self.get_channel(&video.author_id).await {
            Ok(channel) => Some(channel),
            Err(AppError::NoSuchChannel(_)) => None,
            Err(error) => return Err(error),
        };

        let directory = match directory {
            Some(directory) => directory.to_string(),
            None => channel
                .as_ref()
                .and_then(|channel| channel.download_directory.clone())
                .unwrap_or_else(|| self.config.download_directory.clone()),
        };
        let extension = match extension {
            Some(extension) => crate::engine::channels::validate_extension(extension)?,
            None => channel
                .as_ref()
                .and_then(|channel| channel.queuefile_extension.clone())
                .unwrap_or_else(|| self.config.queuefile_extension.clone()),
        };

        let queue_dir = PathBuf::from(directory);
        let queue_path = queue_dir.join(format!("{video_id}.{extension}"));
        tracing::debug!("Queueing {}", queue_path.display());
        self.store
            .on_commit(Box::new(move || {
                std::fs::create_dir_all(&queue_dir)?;
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .open(&queue_path)?;
                Ok(())
            }))
            .await?;

        self.mark_video_state_inner(video_id, VideoState::Downloaded).await?;
        Ok(())
    }
}
