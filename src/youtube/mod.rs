mod api;
mod rss;

pub use api::{Upstream, UpstreamError, VideoRecord, YoutubeClient};
pub use rss::{FeedError, FeedProbe, YoutubeFeed};
