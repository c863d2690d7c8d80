mod channel;
mod video;

pub use channel::Channel;
pub use video::{Video, VideoState};
