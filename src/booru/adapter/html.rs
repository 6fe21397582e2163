//! HTML scraping for gelbooru-style sites.
//!
//! Used as the fallback path when a site's DAPI endpoint is blocked or
//! broken, and for re-resolving full-media URLs that the structured API
//! reported as sample/thumbnail variants. Listing pages exist in two
//! structural generations (a modern card layout and the legacy thumb
//! layout); both are tried on every page. The thumbnail `title` attribute
//! embeds tags plus `rating:`/`score:` pseudo-tags, which are recovered by
//! tokenizing on whitespace.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::booru::adapter::AdapterResult;
use crate::booru::parse::{
    absolute_url, fix_thumbs_subdomain, parse_int, parse_positive_u32, parse_unix_time,
    single_tag_group,
};
use crate::booru::post::{Post, PostDetails, Rating, SharedPost};
use crate::booru::site::BooruSite;
use crate::booru::transport::HttpTransport;

static MODERN_CARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<article\s+class="thumbnail-preview".*?<a\s+id="p(?P<id>\d+)"\s+href="(?P<href>[^"]+)".*?<img[^>]*src="(?P<src>[^"]+)"[^>]*title="(?P<title>[^"]*)""#,
    )
    .expect("modern card regex")
});

static LEGACY_THUMB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<span\s+class="thumb">\s*<a\s+id="p(?P<id>\d+)"\s+href="(?P<href>[^"]+)"[^>]*>\s*<img[^>]*src="(?P<src>[^"]+)"[^>]*title="(?P<title>[^"]*)""#,
    )
    .expect("legacy thumb regex")
});

static ORIGINAL_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<a\b[^>]*href=["'](?P<url>[^"']+)["'][^>]*>\s*Original(?:\s+image)?\s*</a>"#)
        .expect("original link regex")
});

/// `img#image`, both attribute orders (the regex engine has no lookahead).
static IMAGE_TAG_ID_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*\bid=["']image["'][^>]*\bsrc=["'](?P<url>[^"']+)["']"#)
        .expect("image tag regex")
});
static IMAGE_TAG_SRC_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*\bsrc=["'](?P<url>[^"']+)["'][^>]*\bid=["']image["']"#)
        .expect("image tag regex")
});

static OG_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\s+property="og:image"\s+content="(?P<url>[^"]+)""#)
        .expect("og:image regex")
});

/// Direct full-image URL on booru.org project post pages.
static IMG_BOORU_DIRECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https://img\.booru\.org/[^/]+//images/[^/]+/[^."']+\.(?:jpg|jpeg|png|gif|webp)"#)
        .expect("img.booru.org regex")
});

static DATA_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-tags="(?P<tags>[^"]*)""#).expect("data-tags regex"));
static TEXTAREA_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<textarea[^>]*id="tags"[^>]*>(?P<tags>.*?)</textarea>"#)
        .expect("textarea tags regex")
});
static DATA_RATING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-rating="(?P<rating>[^"]*)""#).expect("data-rating regex"));
static TEXT_RATING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)Rating:\s*(?P<rating>[A-Za-z]+)"#).expect("rating regex"));
static DATA_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-width="(?P<width>\d+)""#).expect("data-width regex"));
static DATA_HEIGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-height="(?P<height>\d+)""#).expect("data-height regex"));
static TEXT_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)Size:\s*(?P<width>\d+)x(?P<height>\d+)"#).expect("size regex")
});
static TEXT_SCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)Score:\s*(?P<score>-?\d+)"#).expect("score regex"));
static TEXT_POSTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)Posted:\s*(?P<posted>[0-9:\-\s]+)"#).expect("posted regex"));

#[derive(Clone)]
pub struct HtmlAdapter {
    transport: HttpTransport,
}

impl HtmlAdapter {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    /// Fetch and parse one raw listing page. `pid` is the raw HTML page
    /// cursor, not the logical search page.
    pub async fn fetch_list_page(
        &self,
        site: BooruSite,
        tags: &str,
        pid: u32,
    ) -> AdapterResult<Vec<SharedPost>> {
        let mut url = format!("{}/index.php?page=post&s=list&pid={}", site.base_url(), pid);
        let tags = tags.trim();
        if !tags.is_empty() {
            url.push_str("&tags=");
            url.push_str(&urlencode(tags));
        }

        let body = self
            .transport
            .get_text(&url, site.requires_browser_user_agent())
            .await?;
        Ok(parse_list_page(site, &body))
    }

    /// Fetch and scrape one post page. Any failure is `Ok(None)`; the
    /// orchestrator treats an unusable HTML resolution as "keep what the
    /// structured path produced".
    pub async fn fetch_post_page(&self, site: BooruSite, id: &str) -> Option<SharedPost> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }

        let url = post_page_url(site, id);
        let body = self
            .transport
            .get_text(&url, site.requires_browser_user_agent())
            .await
            .ok()?;
        if body.trim().is_empty() {
            return None;
        }

        parse_post_page(site, id, &body)
    }
}

pub(crate) fn post_page_url(site: BooruSite, id: &str) -> String {
    format!(
        "{}/index.php?page=post&s=view&id={}",
        site.base_url(),
        urlencode(id)
    )
}

/// Parse a listing page with both layout generations, deduplicating by id
/// within the page.
pub(crate) fn parse_list_page(site: BooruSite, html: &str) -> Vec<SharedPost> {
    let mut posts = Vec::new();
    if html.trim().is_empty() {
        return posts;
    }

    let mut seen_ids: Vec<String> = Vec::new();
    for regex in [&*MODERN_CARD, &*LEGACY_THUMB] {
        for capture in regex.captures_iter(html) {
            let id = capture["id"].trim().to_string();
            if id.is_empty() || seen_ids.contains(&id) {
                continue;
            }

            let href = html_escape::decode_html_entities(&capture["href"]).to_string();
            let src = html_escape::decode_html_entities(&capture["src"]).to_string();
            let post_url = absolute_url(site.base_url(), &href);
            let preview = absolute_url(site.base_url(), &src);
            if post_url.trim().is_empty() || preview.trim().is_empty() {
                continue;
            }

            seen_ids.push(id.clone());
            let title = html_escape::decode_html_entities(&capture["title"]).to_string();
            let (tags, rating, score) = parse_list_title(&title);

            posts.push(Post::new(
                site,
                &id,
                PostDetails {
                    // The listing only exposes the thumbnail; the full URL
                    // is resolved lazily from the post page when needed.
                    preview_url: preview.clone(),
                    full_url: preview,
                    post_url,
                    rating: Rating::parse(&rating),
                    tag_groups: single_tag_group(&tags),
                    tags,
                    score,
                    created_at_unix: 0,
                    width: 0,
                    height: 0,
                },
            ));
        }
    }

    posts
}

/// Tokenize a thumbnail title: `rating:`/`score:` pseudo-tags are lifted
/// out, everything else is a tag.
pub(crate) fn parse_list_title(title: &str) -> (String, String, i64) {
    let mut tags = Vec::new();
    let mut rating = String::new();
    let mut score = 0;

    for token in title.split_whitespace() {
        let lower = token.to_lowercase();
        if let Some(value) = lower.strip_prefix("score:") {
            score = parse_int(value);
            continue;
        }
        if lower.starts_with("rating:") {
            rating = token["rating:".len()..].to_string();
            continue;
        }
        tags.push(token.to_string());
    }

    (tags.join(" "), rating, score)
}

/// Scrape a post page into a full post record.
pub(crate) fn parse_post_page(site: BooruSite, id: &str, html: &str) -> Option<SharedPost> {
    let mut full_raw = String::new();

    if site.uses_thumbs_subdomain_fix() {
        if let Some(direct) = IMG_BOORU_DIRECT.find(html) {
            full_raw = direct.as_str().to_string();
        }
    }

    if full_raw.is_empty() {
        full_raw = ORIGINAL_LINK
            .captures(html)
            .or_else(|| IMAGE_TAG_ID_FIRST.captures(html))
            .or_else(|| IMAGE_TAG_SRC_FIRST.captures(html))
            .map(|c| c["url"].to_string())
            .unwrap_or_default();
    }

    let preview_raw = OG_IMAGE
        .captures(html)
        .map(|c| c["url"].to_string())
        .unwrap_or_else(|| full_raw.clone());

    let mut full = absolute_url(
        site.base_url(),
        &html_escape::decode_html_entities(&full_raw),
    );
    let mut preview = absolute_url(
        site.base_url(),
        &html_escape::decode_html_entities(&preview_raw),
    );

    if site.uses_thumbs_subdomain_fix() {
        full = fix_thumbs_subdomain(&full);
        preview = fix_thumbs_subdomain(&preview);
    }

    if full.trim().is_empty() {
        return None;
    }
    if preview.trim().is_empty() {
        preview = full.clone();
    }

    let tags = DATA_TAGS
        .captures(html)
        .or_else(|| TEXTAREA_TAGS.captures(html))
        .map(|c| html_escape::decode_html_entities(&c["tags"]).trim().to_string())
        .unwrap_or_default();

    let rating = DATA_RATING
        .captures(html)
        .or_else(|| TEXT_RATING.captures(html))
        .map(|c| html_escape::decode_html_entities(&c["rating"]).trim().to_string())
        .unwrap_or_default();

    let (mut width, mut height) = (
        DATA_WIDTH
            .captures(html)
            .map_or(0, |c| parse_positive_u32(&c["width"])),
        DATA_HEIGHT
            .captures(html)
            .map_or(0, |c| parse_positive_u32(&c["height"])),
    );
    if width == 0 || height == 0 {
        if let Some(size) = TEXT_SIZE.captures(html) {
            width = parse_positive_u32(&size["width"]);
            height = parse_positive_u32(&size["height"]);
        }
    }

    let score = TEXT_SCORE.captures(html).map_or(0, |c| parse_int(&c["score"]));
    let created_at_unix = TEXT_POSTED
        .captures(html)
        .map_or(0, |c| parse_unix_time(c["posted"].trim()));

    Some(Post::new(
        site,
        id,
        PostDetails {
            preview_url: preview,
            full_url: full,
            post_url: post_page_url(site, id),
            rating: Rating::parse(&rating),
            tag_groups: single_tag_group(&tags),
            tags,
            score,
            created_at_unix,
            width,
            height,
        },
    ))
}

fn urlencode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
