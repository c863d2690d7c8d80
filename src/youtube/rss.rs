//! Free "what's new" probe over the public RSS feed. Best effort only: any
//! failure collapses into [`FeedError`] and the caller falls back to the
//! metered API.

use async_trait::async_trait;
use reqwest::Client;

#[derive(thiserror::Error, Debug)]
#[error("Feed lookup failed: {0}")]
pub struct FeedError(pub String);

#[async_trait]
pub trait FeedProbe: Send + Sync {
    /// Most recent video ids for a channel, newest first. The length cap is
    /// the feed's own (around 15 entries); it is never extended locally.
    async fn list_recent_ids(&self, channel_id: &str) -> Result<Vec<String>, FeedError>;
}

pub struct YoutubeFeed {
    http_client: Client,
}

impl YoutubeFeed {
    pub fn new() -> Self {
        YoutubeFeed {
            http_client: Client::new(),
        }
    }
}

impl Default for YoutubeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedProbe for YoutubeFeed {
    async fn list_recent_ids(&self, channel_id: &str) -> Result<Vec<String>, FeedError> {
        let url = format!("https://www.youtube.com/feeds/videos.xml?channel_id={channel_id}");
        tracing::debug!("Fetching feed for {}", channel_id);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| FeedError(error.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|error| FeedError(error.to_string()))?;

        parse_ids(&bytes)
    }
}

fn parse_ids(bytes: &[u8]) -> Result<Vec<String>, FeedError> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|error| FeedError(format!("feed parse error: {error}")))?;

    // Entry ids come through as "yt:video:<id>".
    let ids = feed
        .entries
        .into_iter()
        .map(|entry| match entry.id.strip_prefix("yt:video:") {
            Some(id) => id.to_string(),
            None => entry.id,
        })
        .collect();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
  <id>yt:channel:UC123</id>
  <title>some channel</title>
  <entry>
    <id>yt:video:VIDNEW</id>
    <title>newest upload</title>
  </entry>
  <entry>
    <id>yt:video:VIDMID</id>
    <title>recent upload</title>
  </entry>
  <entry>
    <id>yt:video:VIDOLD</id>
    <title>older upload</title>
  </entry>
</feed>
"#;

    #[test]
    fn parses_ids_newest_first() {
        let ids = parse_ids(FEED_XML.as_bytes()).unwrap();
        assert_eq!(ids, vec!["VIDNEW", "VIDMID", "VIDOLD"]);
    }

    #[test]
    fn garbage_is_a_feed_error() {
        assert!(parse_ids(b"this is not xml").is_err());
    }
}
