//! Channel operations: add/delete, config setters, and the refresh state
//! machine.

use std::collections::{HashMap, HashSet};

use futures::TryStreamExt;
use serde::Deserialize;
use sqlx::Row;

use crate::engine::{AssistOutcome, Engine};
use crate::errors::AppError;
use crate::models::{Channel, VideoState};
use crate::store::Arg;
use crate::youtube::VideoRecord;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChannel {
    pub id: String,
    pub name: Option<String>,
    pub download_directory: Option<String>,
    pub queuefile_extension: Option<String>,
    pub automark: Option<String>,
    /// Refresh the channel immediately after adding it.
    #[serde(default)]
    pub get_videos: bool,
}

/// One channel that failed during a `skip_failures` refresh-all pass.
#[derive(Debug)]
pub struct RefreshFailure {
    pub channel_id: String,
    pub error: AppError,
}

impl Engine {
    /// Adding an id that is already tracked returns the existing channel
    /// untouched.
    pub async fn add_channel(&self, options: NewChannel) -> Result<Channel, AppError> {
        self.store.begin().await?;
        let result = self.add_channel_inner(options).await;
        self.finish(result).await
    }

    async fn add_channel_inner(&self, options: NewChannel) -> Result<Channel, AppError> {
        match self.get_channel(&options.id).await {
            Ok(existing) => return Ok(existing),
            Err(AppError::NoSuchChannel(_)) => {}
            Err(error) => return Err(error),
        }

        let automark = match options.automark.as_deref() {
            Some(value) => VideoState::try_from(value)?,
            None => VideoState::Pending,
        };
        let name = match options.name {
            Some(name) => name,
            None => self.youtube.resolve_channel_name(&options.id).await?,
        };
        let download_directory = options
            .download_directory
            .as_deref()
            .map(validate_directory)
            .transpose()?;
        let queuefile_extension = options
            .queuefile_extension
            .as_deref()
            .map(validate_extension)
            .transpose()?;

        let channel = Channel {
            id: options.id,
            name,
            uploads_playlist: None,
            download_directory,
            queuefile_extension,
            automark,
            autorefresh: true,
        };
        self.insert_channel_row(&channel).await?;
        tracing::info!("Added channel {} ({})", channel.id, channel.name);

        if options.get_videos {
            self.refresh_channel(&channel.id, false, true).await?;
        }
        Ok(channel)
    }

    pub(crate) async fn insert_channel_row(&self, channel: &Channel) -> Result<(), AppError> {
        self.store
            .insert(
                "channels",
                &[
                    ("id", Arg::from(channel.id.as_str())),
                    ("name", Arg::from(channel.name.as_str())),
                    ("uploads_playlist", Arg::from(channel.uploads_playlist.clone())),
                    ("download_directory", Arg::from(channel.download_directory.clone())),
                    ("queuefile_extension", Arg::from(channel.queuefile_extension.clone())),
                    ("automark", Arg::from(channel.automark.as_str())),
                    ("autorefresh", Arg::from(channel.autorefresh)),
                ],
            )
            .await?;
        self.cache_channel(channel);
        Ok(())
    }

    /// All channels, sorted by lowercased name.
    pub async fn get_channels(&self) -> Result<Vec<Channel>, AppError> {
        let rows = self.store.fetch_all("SELECT * FROM channels", &[]).await?;
        let mut channels = rows
            .iter()
            .map(|row| self.channel_from_row_cached(row))
            .collect::<Result<Vec<_>, _>>()?;
        channels.sort_by_key(|channel| channel.name.to_lowercase());
        Ok(channels)
    }

    /// Deletes the channel and every video it owns.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<(), AppError> {
        self.store.begin().await?;
        let result: Result<(), AppError> = async {
            let channel = self.get_channel(channel_id).await?;
            let rows = self
                .store
                .fetch_all(
                    "SELECT id FROM videos WHERE author_id = ?",
                    &[Arg::from(channel_id)],
                )
                .await?;
            for row in &rows {
                let video_id: String = row.try_get("id").map_err(crate::store::StoreError::Sqlx)?;
                self.uncache_video(&video_id);
            }
            self.store.delete("videos", &[("author_id", Arg::from(channel_id))]).await?;
            self.store.delete("channels", &[("id", Arg::from(channel_id))]).await?;
            self.uncache_channel(channel_id);
            tracing::info!("Deleted channel {} and {} videos", channel.id, rows.len());
            Ok(())
        }
        .await;
        self.finish(result).await
    }

    pub async fn set_name(&self, channel_id: &str, name: &str) -> Result<Channel, AppError> {
        self.store.begin().await?;
        let result: Result<Channel, AppError> = async {
            let mut channel = self.get_channel(channel_id).await?;
            self.store
                .update(
                    "channels",
                    &[("id", Arg::from(channel_id)), ("name", Arg::from(name))],
                    "id",
                )
                .await?;
            channel.name = name.to_string();
            self.cache_channel(&channel);
            Ok(channel)
        }
        .await;
        self.finish(result).await
    }

    pub async fn set_automark(&self, channel_id: &str, state: &str) -> Result<Channel, AppError> {
        let state = VideoState::try_from(state)?;
        self.store.begin().await?;
        let result: Result<Channel, AppError> = async {
            let mut channel = self.get_channel(channel_id).await?;
            self.store
                .update(
                    "channels",
                    &[("id", Arg::from(channel_id)), ("automark", Arg::from(state.as_str()))],
                    "id",
                )
                .await?;
            channel.automark = state;
            self.cache_channel(&channel);
            Ok(channel)
        }
        .await;
        self.finish(result).await
    }

    pub async fn set_autorefresh(
        &self,
        channel_id: &str,
        autorefresh: bool,
    ) -> Result<Channel, AppError> {
        self.store.begin().await?;
        let result: Result<Channel, AppError> = async {
            let mut channel = self.get_channel(channel_id).await?;
            self.store
                .update(
                    "channels",
                    &[("id", Arg::from(channel_id)), ("autorefresh", Arg::from(autorefresh))],
                    "id",
                )
                .await?;
            channel.autorefresh = autorefresh;
            self.cache_channel(&channel);
            Ok(channel)
        }
        .await;
        self.finish(result).await
    }

    /// `None` clears the override. A set path must name an existing
    /// directory and is stored in canonical absolute form.
    pub async fn set_download_directory(
        &self,
        channel_id: &str,
        directory: Option<&str>,
    ) -> Result<Channel, AppError> {
        let directory = directory.map(validate_directory).transpose()?;
        self.store.begin().await?;
        let result: Result<Channel, AppError> = async {
            let mut channel = self.get_channel(channel_id).await?;
            self.store
                .update(
                    "channels",
                    &[
                        ("id", Arg::from(channel_id)),
                        ("download_directory", Arg::from(directory.clone())),
                    ],
                    "id",
                )
                .await?;
            channel.download_directory = directory;
            self.cache_channel(&channel);
            Ok(channel)
        }
        .await;
        self.finish(result).await
    }

    pub async fn set_queuefile_extension(
        &self,
        channel_id: &str,
        extension: Option<&str>,
    ) -> Result<Channel, AppError> {
        let extension = extension.map(validate_extension).transpose()?;
        self.store.begin().await?;
        let result: Result<Channel, AppError> = async {
            let mut channel = self.get_channel(channel_id).await?;
            self.store
                .update(
                    "channels",
                    &[
                        ("id", Arg::from(channel_id)),
                        ("queuefile_extension", Arg::from(extension.clone())),
                    ],
                    "id",
                )
                .await?;
            channel.queuefile_extension = extension;
            self.cache_channel(&channel);
            Ok(channel)
        }
        .await;
        self.finish(result).await
    }

    async fn set_uploads_playlist(
        &self,
        channel: &mut Channel,
        playlist_id: String,
    ) -> Result<(), AppError> {
        self.store
            .update(
                "channels",
                &[
                    ("id", Arg::from(channel.id.as_str())),
                    ("uploads_playlist", Arg::from(playlist_id.as_str())),
                ],
                "id",
            )
            .await?;
        channel.uploads_playlist = Some(playlist_id);
        self.cache_channel(channel);
        Ok(())
    }

    pub async fn channel_has_pending(&self, channel_id: &str) -> Result<bool, AppError> {
        let row = self
            .store
            .fetch_optional(
                "SELECT 1 FROM videos WHERE author_id = ? AND state = 'pending' LIMIT 1",
                &[Arg::from(channel_id)],
            )
            .await?;
        Ok(row.is_some())
    }

    pub(crate) async fn most_recent_video_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<String>, AppError> {
        let row = self
            .store
            .fetch_optional(
                "SELECT id FROM videos WHERE author_id = ? ORDER BY published DESC LIMIT 1",
                &[Arg::from(channel_id)],
            )
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("id").map_err(crate::store::StoreError::Sqlx)?)),
            None => Ok(None),
        }
    }

    /// Ids of stored videos still marked as an open premiere/livestream.
    pub(crate) async fn open_broadcast_ids(
        &self,
        channel_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let rows = self
            .store
            .fetch_all(
                "SELECT id FROM videos WHERE author_id = ? AND live_broadcast IS NOT NULL",
                &[Arg::from(channel_id)],
            )
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(row.try_get("id").map_err(crate::store::StoreError::Sqlx)?);
        }
        Ok(ids)
    }

    /// Feed-assisted discovery: the ids strictly newer than the most recent
    /// stored video, in feed (newest-first) order.
    pub(crate) async fn rss_assisted_ids(
        &self,
        channel: &Channel,
    ) -> Result<AssistOutcome, AppError> {
        let Some(reference) = self.most_recent_video_id(&channel.id).await? else {
            return Ok(AssistOutcome::NeedsFullRefresh(format!(
                "channel {} has no stored videos",
                channel.id
            )));
        };

        let recent = match self.feeds.list_recent_ids(&channel.id).await {
            Ok(ids) => ids,
            Err(error) => return Ok(AssistOutcome::NeedsFullRefresh(error.to_string())),
        };

        match recent.iter().position(|id| *id == reference) {
            Some(position) => Ok(AssistOutcome::Fresh(recent[..position].to_vec())),
            None => Ok(AssistOutcome::NeedsFullRefresh(format!(
                "feed did not contain {reference}"
            ))),
        }
    }

    /// Refresh one channel inside a single transaction.
    ///
    /// Non-forced refreshes stop at the first already-known video, so the
    /// cost is proportional to the number of new uploads. Forced refreshes
    /// walk the whole listing and then individually re-fetch every stored
    /// video the listing no longer returned.
    #[tracing::instrument(name = "Refresh channel", skip(self))]
    pub async fn refresh_channel(
        &self,
        channel_id: &str,
        force: bool,
        rss_assisted: bool,
    ) -> Result<(), AppError> {
        self.store.begin().await?;
        let result = self.refresh_channel_inner(channel_id, force, rss_assisted).await;
        let result = self.finish(result).await;
        if result.is_ok() {
            self.note_refresh();
        }
        result
    }

    async fn refresh_channel_inner(
        &self,
        channel_id: &str,
        force: bool,
        rss_assisted: bool,
    ) -> Result<(), AppError> {
        let mut channel = self.get_channel(channel_id).await?;

        if force || channel.uploads_playlist.is_none() {
            let playlist_id = self
                .youtube
                .resolve_uploads_playlist(channel_id)
                .await
                .map_err(|error| self.wrap_refresh(channel_id, error))?;
            self.set_uploads_playlist(&mut channel, playlist_id).await?;
        }
        let Some(playlist_id) = channel.uploads_playlist.clone() else {
            return Err(self.wrap_refresh(
                channel_id,
                crate::youtube::UpstreamError::ChannelNotFound(channel_id.to_string()),
            ));
        };

        let mut source = if force || !rss_assisted {
            self.youtube.list_playlist_videos(&playlist_id)
        } else {
            match self.rss_assisted_ids(&channel).await? {
                AssistOutcome::Fresh(ids) => self.youtube.get_videos(ids),
                AssistOutcome::NeedsFullRefresh(reason) => {
                    tracing::debug!(
                        channel = %channel.id,
                        %reason,
                        "RSS assist unavailable, walking the uploads playlist"
                    );
                    self.youtube.list_playlist_videos(&playlist_id)
                }
            }
        };

        let mut seen_ids: HashSet<String> = HashSet::new();
        while let Some(record) = source
            .try_next()
            .await
            .map_err(|error| self.wrap_refresh(channel_id, error))?
        {
            seen_ids.insert(record.id.clone());
            let outcome = self.ingest_and_automark(&record).await?;
            if !outcome.new && !force {
                break;
            }
        }
        drop(source);

        if force {
            let rows = self
                .store
                .fetch_all("SELECT id FROM videos WHERE author_id = ?", &[Arg::from(channel_id)])
                .await?;
            let mut vanished = Vec::new();
            for row in &rows {
                let id: String = row.try_get("id").map_err(crate::store::StoreError::Sqlx)?;
                if !seen_ids.contains(&id) {
                    vanished.push(id);
                }
            }
            if !vanished.is_empty() {
                tracing::debug!("Re-fetching {} videos absent from the listing", vanished.len());
                let mut refetch = self.youtube.get_videos(vanished);
                while let Some(record) = refetch
                    .try_next()
                    .await
                    .map_err(|error| self.wrap_refresh(channel_id, error))?
                {
                    seen_ids.insert(record.id.clone());
                    self.ingest_and_automark(&record).await?;
                }
            }
        }

        // Concluded premieres/livestreams vanish from both the feed and the
        // front of the listing, so they are re-fetched explicitly.
        let open_broadcasts: Vec<String> = self
            .open_broadcast_ids(channel_id)
            .await?
            .into_iter()
            .filter(|id| !seen_ids.contains(id))
            .collect();
        if !open_broadcasts.is_empty() {
            let mut broadcasts = self.youtube.get_videos(open_broadcasts);
            while let Some(record) = broadcasts
                .try_next()
                .await
                .map_err(|error| self.wrap_refresh(channel_id, error))?
            {
                self.ingest_and_automark(&record).await?;
            }
        }

        Ok(())
    }

    /// Refresh every autorefresh channel.
    ///
    /// In assisted mode the new ids of all channels are fetched with a
    /// single batched lookup, then applied per channel, each in its own
    /// transaction. With `skip_failures`, a failing channel is recorded and
    /// skipped while committed channels stand.
    #[tracing::instrument(name = "Refresh all channels", skip(self))]
    pub async fn refresh_all_channels(
        &self,
        force: bool,
        rss_assisted: bool,
        skip_failures: bool,
    ) -> Result<Vec<RefreshFailure>, AppError> {
        let channels: Vec<Channel> = self
            .get_channels()
            .await?
            .into_iter()
            .filter(|channel| channel.autorefresh)
            .collect();

        let mut failures = Vec::new();

        if !force && rss_assisted {
            let mut assisted: Vec<(Channel, Vec<String>)> = Vec::new();
            let mut fallback: Vec<Channel> = Vec::new();

            for channel in channels {
                match self.rss_assisted_ids(&channel).await? {
                    AssistOutcome::Fresh(new_ids) => {
                        let mut ids = new_ids;
                        for id in self.open_broadcast_ids(&channel.id).await? {
                            if !ids.contains(&id) {
                                ids.push(id);
                            }
                        }
                        assisted.push((channel, ids));
                    }
                    AssistOutcome::NeedsFullRefresh(reason) => {
                        tracing::debug!(
                            channel = %channel.id,
                            %reason,
                            "RSS assist unavailable, scheduling a full refresh"
                        );
                        fallback.push(channel);
                    }
                }
            }

            let union: Vec<String> = assisted
                .iter()
                .flat_map(|(_, ids)| ids.iter().cloned())
                .collect();

            let mut records: HashMap<String, VideoRecord> = HashMap::new();
            if !union.is_empty() {
                let mut lookup = self.youtube.get_videos(union);
                let mut lookup_error = None;
                loop {
                    match lookup.try_next().await {
                        Ok(Some(record)) => {
                            records.insert(record.id.clone(), record);
                        }
                        Ok(None) => break,
                        Err(error) => {
                            lookup_error = Some(error);
                            break;
                        }
                    }
                }
                if let Some(error) = lookup_error {
                    tracing::warn!(
                        %error,
                        "Batched lookup failed, demoting assisted channels to full refreshes"
                    );
                    fallback.extend(assisted.drain(..).map(|(channel, _)| channel));
                }
            }

            for (channel, ids) in assisted {
                self.store.begin().await?;
                let result: Result<(), AppError> = async {
                    for id in &ids {
                        if let Some(record) = records.get(id) {
                            self.ingest_and_automark(record).await?;
                        }
                    }
                    Ok(())
                }
                .await;
                match self.finish(result).await {
                    Ok(()) => {}
                    Err(error) if skip_failures => {
                        tracing::error!(channel = %channel.id, %error, "Channel refresh failed");
                        failures.push(RefreshFailure {
                            channel_id: channel.id.clone(),
                            error,
                        });
                    }
                    Err(error) => return Err(error),
                }
            }

            for channel in fallback {
                match self.refresh_channel(&channel.id, false, false).await {
                    Ok(()) => {}
                    Err(error) if skip_failures => {
                        tracing::error!(channel = %channel.id, %error, "Channel refresh failed");
                        failures.push(RefreshFailure {
                            channel_id: channel.id.clone(),
                            error,
                        });
                    }
                    Err(error) => return Err(error),
                }
            }
        } else {
            for channel in channels {
                match self.refresh_channel(&channel.id, force, rss_assisted).await {
                    Ok(()) => {}
                    Err(error) if skip_failures => {
                        tracing::error!(channel = %channel.id, %error, "Channel refresh failed");
                        failures.push(RefreshFailure {
                            channel_id: channel.id.clone(),
                            error,
                        });
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        self.note_refresh();
        Ok(failures)
    }
}

pub(crate) fn validate_directory(path: &str) -> Result<String, AppError> {
    let canonical =
        std::fs::canonicalize(path).map_err(|_| AppError::NotADirectory(path.to_string()))?;
    if !canonical.is_dir() {
        return Err(AppError::NotADirectory(path.to_string()));
    }
    canonical
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation(format!("path {path:?} is not valid unicode")))
}

pub(crate) fn validate_extension(extension: &str) -> Result<String, AppError> {
    let trimmed = extension.trim().trim_start_matches('.');
    if trimmed.is_empty()
        || trimmed.contains(['/', '\\'])
        || trimmed.contains(char::is_whitespace)
    {
        return Err(AppError::Validation(format!(
            "{extension:?} is not a usable queuefile extension"
        )));
    }
    Ok(trimmed.to_string())
}
