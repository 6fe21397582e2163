//! Handoff boundary to the media decode/playback collaborator.
//!
//! This core's responsibility for video posts ends at producing a
//! validated media URL plus the referer the CDN expects. Frame decoding,
//! audio, and seeking belong to the external player process, reached
//! through the two traits below.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::booru::fetch::resolve_referer;
use crate::booru::post::SharedPost;
use crate::booru::site::BooruSite;

/// Everything the player collaborator needs to open a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoHandoff {
    pub url: String,
    pub referer: Option<String>,
    pub site: BooruSite,
}

/// Build the playback handoff for a video post. Non-video posts and
/// posts without a usable media URL yield nothing.
pub fn video_handoff(post: &SharedPost) -> Option<VideoHandoff> {
    if !post.is_video() {
        return None;
    }

    let url = post.full_url();
    if url.trim().is_empty() {
        return None;
    }

    let referer = resolve_referer(&url, Some(post.site())).map(|u| u.to_string());
    Some(VideoHandoff {
        url,
        referer,
        site: post.site(),
    })
}

/// Stream metadata reported back by the decode collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaMetadata {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub duration_secs: f64,
}

/// Decode-side probe: URL + referer in, stream metadata out.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, handoff: &VideoHandoff) -> Option<MediaMetadata>;
}

/// Raw-frame source: URL + start offset in, a readable frame byte stream
/// out. Scrubbing re-opens at a new offset.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(
        &self,
        handoff: &VideoHandoff,
        start_offset_secs: f64,
    ) -> Option<Box<dyn AsyncRead + Send + Unpin>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booru::post::{Post, PostDetails};

    fn post(full_url: &str) -> SharedPost {
        Post::new(
            BooruSite::Gelbooru,
            "1",
            PostDetails {
                preview_url: "https://img3.gelbooru.com/thumbnails/a/thumbnail_1.jpg".into(),
                full_url: full_url.into(),
                ..PostDetails::default()
            },
        )
    }

    #[test]
    fn video_posts_hand_off_url_and_referer() {
        let handoff =
            video_handoff(&post("https://img3.gelbooru.com/images/a/1.webm")).expect("handoff");
        assert_eq!(handoff.url, "https://img3.gelbooru.com/images/a/1.webm");
        assert_eq!(handoff.referer.as_deref(), Some("https://gelbooru.com/"));
        assert_eq!(handoff.site, BooruSite::Gelbooru);
    }

    #[test]
    fn still_images_do_not_hand_off() {
        assert!(video_handoff(&post("https://img3.gelbooru.com/images/a/1.png")).is_none());
    }
}
