use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::models::video::decode_state;
use crate::models::VideoState;
use crate::store::StoreError;

/// A tracked external publisher. `automark` is the state assigned to newly
/// discovered videos; `autorefresh` controls inclusion in refresh-all.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub uploads_playlist: Option<String>,
    pub download_directory: Option<String>,
    pub queuefile_extension: Option<String>,
    pub automark: VideoState,
    pub autorefresh: bool,
}

impl Channel {
    pub fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let name: Option<String> = row.try_get("name")?;
        Ok(Channel {
            id: row.try_get("id")?,
            name: name.unwrap_or_default(),
            uploads_playlist: row.try_get("uploads_playlist")?,
            download_directory: row.try_get("download_directory")?,
            queuefile_extension: row.try_get("queuefile_extension")?,
            automark: decode_state(row.try_get("automark")?)?,
            autorefresh: row.try_get("autorefresh")?,
        })
    }
}
