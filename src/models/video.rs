use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::errors::AppError;
use crate::store::StoreError;

/// Lifecycle state of a tracked video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoState {
    Ignored,
    Pending,
    Downloaded,
}

impl VideoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoState::Ignored => "ignored",
            VideoState::Pending => "pending",
            VideoState::Downloaded => "downloaded",
        }
    }
}

impl TryFrom<&str> for VideoState {
    type Error = AppError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "ignored" => Ok(VideoState::Ignored),
            "pending" => Ok(VideoState::Pending),
            "downloaded" => Ok(VideoState::Downloaded),
            other => Err(AppError::InvalidState(other.to_string())),
        }
    }
}

impl std::fmt::Display for VideoState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub published: i64,
    pub author_id: String,
    pub title: String,
    pub description: String,
    pub duration: i64,
    pub views: Option<i64>,
    pub thumbnail: String,
    pub live_broadcast: Option<String>,
    pub state: VideoState,
}

/// NULL decodes to pending (the insert-time default); anything else must be
/// one of the three valid states.
pub(crate) fn decode_state(value: Option<String>) -> Result<VideoState, StoreError> {
    match value.as_deref() {
        None => Ok(VideoState::Pending),
        Some(text) => VideoState::try_from(text).map_err(|_| {
            StoreError::Sqlx(sqlx::Error::Decode(
                format!("invalid video state {text:?}").into(),
            ))
        }),
    }
}

impl Video {
    pub fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let state = decode_state(row.try_get("state")?)?;
        Ok(Video {
            id: row.try_get("id")?,
            published: row.try_get("published")?,
            author_id: row.try_get("author_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            duration: row.try_get("duration")?,
            views: row.try_get("views")?,
            thumbnail: row.try_get("thumbnail")?,
            live_broadcast: row.try_get("live_broadcast")?,
            state,
        })
    }
}
