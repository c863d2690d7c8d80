use std::env;

const DEFAULT_DATABASE: &str = "vodsync.db";
const DEFAULT_DOWNLOAD_DIRECTORY: &str = ".";
const DEFAULT_QUEUEFILE_EXTENSION: &str = "ytqueue";
const DEFAULT_BIND: &str = "0.0.0.0:3001";

const DEFAULT_CHANNEL_CACHE_SIZE: usize = 20_000;
const DEFAULT_VIDEO_CACHE_SIZE: usize = 50_000;

/// Runtime configuration, read once at startup from the environment
/// (`.env` is loaded first by main).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub youtube_api_key: String,
    pub download_directory: String,
    pub queuefile_extension: String,
    pub bind_address: String,
    /// Seconds between background refresh-all passes. 0 disables the poller.
    pub refresh_interval_seconds: u64,
    pub channel_cache_size: usize,
    pub video_cache_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Config {
            database_path: env::var("VODSYNC_DATABASE")
                .unwrap_or_else(|_| DEFAULT_DATABASE.to_string()),
            youtube_api_key: env::var("YOUTUBE_API_KEY")?,
            download_directory: env::var("VODSYNC_DOWNLOAD_DIRECTORY")
                .unwrap_or_else(|_| DEFAULT_DOWNLOAD_DIRECTORY.to_string()),
            queuefile_extension: env::var("VODSYNC_QUEUEFILE_EXTENSION")
                .unwrap_or_else(|_| DEFAULT_QUEUEFILE_EXTENSION.to_string()),
            bind_address: env::var("VODSYNC_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            refresh_interval_seconds: parse_var("VODSYNC_REFRESH_INTERVAL_SECONDS", 86_400),
            channel_cache_size: parse_var("VODSYNC_CHANNEL_CACHE_SIZE", DEFAULT_CHANNEL_CACHE_SIZE),
            video_cache_size: parse_var("VODSYNC_VIDEO_CACHE_SIZE", DEFAULT_VIDEO_CACHE_SIZE),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Config {
    pub fn for_tests(download_directory: &str) -> Self {
        Config {
            database_path: ":memory:".to_string(),
            youtube_api_key: String::new(),
            download_directory: download_directory.to_string(),
            queuefile_extension: DEFAULT_QUEUEFILE_EXTENSION.to_string(),
            bind_address: DEFAULT_BIND.to_string(),
            refresh_interval_seconds: 0,
            channel_cache_size: DEFAULT_CHANNEL_CACHE_SIZE,
            video_cache_size: DEFAULT_VIDEO_CACHE_SIZE,
        }
    }
}
