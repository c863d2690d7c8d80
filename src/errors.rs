use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::StoreError;
use crate::youtube::UpstreamError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Channel {0} does not exist")]
    NoSuchChannel(String),

    #[error("Video {0} does not exist")]
    NoSuchVideo(String),

    #[error("{0} is not a valid state")]
    InvalidState(String),

    #[error("{0} is not a directory")]
    NotADirectory(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Refresh of channel {channel_id} failed: {source}")]
    ChannelRefresh {
        channel_id: String,
        #[source]
        source: UpstreamError,
    },

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NoSuchChannel(_) | AppError::NoSuchVideo(_) => {
                (StatusCode::NOT_FOUND, format!("{}", self))
            }
            AppError::InvalidState(_)
            | AppError::NotADirectory(_)
            | AppError::Validation(_) => (StatusCode::BAD_REQUEST, format!("{}", self)),
            AppError::ChannelRefresh { .. } | AppError::Upstream(_) => {
                (StatusCode::BAD_GATEWAY, format!("{}", self))
            }
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", self)),
        };

        if status.is_server_error() {
            tracing::error!(
                error_message = %error_message,
                status_code = %status,
                "Request error"
            );
        }

        let body = Json(json!({
            "message": error_message,
            "status": status.as_u16()
        }));
        (status, body).into_response()
    }
}
