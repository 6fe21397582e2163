//! Client-side filtering and ordering of the master post list.
//!
//! These run entirely over already-loaded posts to produce the visible
//! sequence; nothing here touches the network. Tag conditions match whole
//! tokens, never substrings.

use crate::booru::post::SharedPost;

/// Media class filter, keyed off the media URL's file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaTypeFilter {
    #[default]
    All,
    /// Still images only.
    Images,
    /// gif/apng animations.
    Animated,
    /// webm + mp4.
    Video,
    Webm,
    Mp4,
}

/// Size-class filter over the larger pixel dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeFilter {
    #[default]
    All,
    /// Max dimension above 2000px.
    Large,
    /// Max dimension between 1000 and 2000px inclusive.
    Medium,
    /// Known dimension below 1000px.
    Small,
}

/// Sort order for the visible list. All orders are descending with date
/// rank as the tie-breaker, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultSort {
    #[default]
    DateDesc,
    PixelAreaDesc,
    ScoreDesc,
}

#[derive(Debug, Clone, Default)]
pub struct VisibleFilter {
    pub favorites_only: bool,
    pub media_type: MediaTypeFilter,
    pub size: SizeFilter,
    pub min_score: i64,
    pub min_width: u32,
    pub min_height: u32,
    /// Lowercased tag tokens that must all be present.
    pub required_tags: Vec<String>,
    /// Lowercased tag tokens that must all be absent.
    pub excluded_tags: Vec<String>,
}

impl VisibleFilter {
    pub fn matches(&self, post: &SharedPost) -> bool {
        if self.favorites_only && !post.is_favorite() {
            return false;
        }
        if !self.matches_media_type(post) {
            return false;
        }
        if !self.matches_size(post) {
            return false;
        }

        let details = post.details();
        if details.score < self.min_score {
            return false;
        }
        if self.min_width > 0 && details.width < self.min_width {
            return false;
        }
        if self.min_height > 0 && details.height < self.min_height {
            return false;
        }

        if self.required_tags.is_empty() && self.excluded_tags.is_empty() {
            return true;
        }

        let haystack = normalized_tag_haystack(&details.tags);
        for token in &self.required_tags {
            if !haystack.contains(&format!(" {token} ")) {
                return false;
            }
        }
        for token in &self.excluded_tags {
            if haystack.contains(&format!(" {token} ")) {
                return false;
            }
        }

        true
    }

    fn matches_media_type(&self, post: &SharedPost) -> bool {
        let path = post.media_path().to_lowercase();
        let is_webm = path.ends_with(".webm");
        let is_mp4 = path.ends_with(".mp4");
        let is_animated_image = path.ends_with(".gif") || path.ends_with(".apng");

        match self.media_type {
            MediaTypeFilter::All => true,
            MediaTypeFilter::Images => !is_webm && !is_mp4 && !is_animated_image,
            MediaTypeFilter::Animated => is_animated_image,
            MediaTypeFilter::Video => is_webm || is_mp4,
            MediaTypeFilter::Webm => is_webm,
            MediaTypeFilter::Mp4 => is_mp4,
        }
    }

    fn matches_size(&self, post: &SharedPost) -> bool {
        let details = post.details();
        let max_dimension = details.width.max(details.height);

        match self.size {
            SizeFilter::All => true,
            SizeFilter::Large => max_dimension > 2000,
            SizeFilter::Medium => (1000..=2000).contains(&max_dimension),
            SizeFilter::Small => max_dimension > 0 && max_dimension < 1000,
        }
    }
}

/// Parse a user-entered tag condition into filter tokens.
pub fn parse_filter_tokens(raw: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in raw.split([' ', ',', '\t', '\r', '\n']) {
        let token = token.trim().to_lowercase();
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// Space-padded lowercase tag string for whole-token matching.
fn normalized_tag_haystack(tags: &str) -> String {
    if tags.trim().is_empty() {
        return " ".to_string();
    }
    let joined = tags
        .split([' ', ',', '\t', '\r', '\n'])
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    format!(" {joined} ")
}

/// Order posts for display.
pub fn order_posts(posts: &mut [SharedPost], sort: ResultSort) {
    match sort {
        ResultSort::DateDesc => {
            posts.sort_by_key(|p| std::cmp::Reverse(p.date_rank()));
        }
        ResultSort::PixelAreaDesc => {
            posts.sort_by_key(|p| std::cmp::Reverse((p.pixel_area(), p.date_rank())));
        }
        ResultSort::ScoreDesc => {
            posts.sort_by_key(|p| std::cmp::Reverse((p.score(), p.date_rank())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booru::post::{Post, PostDetails};
    use crate::booru::site::BooruSite;

    fn post(id: &str, ext: &str, score: i64, width: u32, height: u32, tags: &str) -> SharedPost {
        Post::new(
            BooruSite::Safebooru,
            id,
            PostDetails {
                preview_url: format!("https://safebooru.org/t/{id}.jpg"),
                full_url: format!("https://safebooru.org/f/{id}.{ext}"),
                tags: tags.to_string(),
                score,
                width,
                height,
                created_at_unix: 0,
                ..PostDetails::default()
            },
        )
    }

    #[test]
    fn media_type_filter_sniffs_extensions() {
        let image = post("1", "png", 0, 100, 100, "");
        let webm = post("2", "webm", 0, 100, 100, "");
        let gif = post("3", "gif", 0, 100, 100, "");

        let videos = VisibleFilter {
            media_type: MediaTypeFilter::Video,
            ..VisibleFilter::default()
        };
        assert!(!videos.matches(&image));
        assert!(videos.matches(&webm));
        assert!(!videos.matches(&gif));

        let images = VisibleFilter {
            media_type: MediaTypeFilter::Images,
            ..VisibleFilter::default()
        };
        assert!(images.matches(&image));
        assert!(!images.matches(&webm));
        assert!(!images.matches(&gif));
    }

    #[test]
    fn size_classes_split_on_max_dimension() {
        let large = post("1", "png", 0, 2100, 900, "");
        let medium = post("2", "png", 0, 1000, 400, "");
        let small = post("3", "png", 0, 640, 480, "");
        let unknown = post("4", "png", 0, 0, 0, "");

        let filter = VisibleFilter {
            size: SizeFilter::Small,
            ..VisibleFilter::default()
        };
        assert!(!filter.matches(&large));
        assert!(!filter.matches(&medium));
        assert!(filter.matches(&small));
        // Unknown dimensions never count as small.
        assert!(!filter.matches(&unknown));
    }

    #[test]
    fn tag_conditions_match_whole_tokens() {
        let p = post("1", "png", 0, 100, 100, "blue_sky cloud");
        let requires_sky = VisibleFilter {
            required_tags: parse_filter_tokens("sky"),
            ..VisibleFilter::default()
        };
        // "sky" is not the token "blue_sky".
        assert!(!requires_sky.matches(&p));

        let requires_blue_sky = VisibleFilter {
            required_tags: parse_filter_tokens("Blue_Sky"),
            ..VisibleFilter::default()
        };
        assert!(requires_blue_sky.matches(&p));

        let excludes_cloud = VisibleFilter {
            excluded_tags: parse_filter_tokens("cloud"),
            ..VisibleFilter::default()
        };
        assert!(!excludes_cloud.matches(&p));
    }

    #[test]
    fn minimum_score_and_dimensions_gate() {
        let p = post("1", "png", 5, 800, 600, "");
        let filter = VisibleFilter {
            min_score: 6,
            ..VisibleFilter::default()
        };
        assert!(!filter.matches(&p));

        let filter = VisibleFilter {
            min_score: 5,
            min_width: 900,
            ..VisibleFilter::default()
        };
        assert!(!filter.matches(&p));
    }

    #[test]
    fn sort_orders_are_descending_with_date_tiebreak() {
        let mut posts = vec![
            post("10", "png", 5, 100, 100, ""),
            post("30", "png", 1, 4000, 4000, ""),
            post("20", "png", 9, 500, 500, ""),
        ];

        order_posts(&mut posts, ResultSort::DateDesc);
        assert_eq!(posts[0].id(), "30");

        order_posts(&mut posts, ResultSort::ScoreDesc);
        assert_eq!(posts[0].id(), "20");

        order_posts(&mut posts, ResultSort::PixelAreaDesc);
        assert_eq!(posts[0].id(), "30");
    }
}
