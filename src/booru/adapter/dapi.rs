//! XML-attribute adapter for gelbooru-style DAPI backends.
//!
//! One implementation serves every DAPI site; the descriptor supplies the
//! base URL and quirk flags. DAPI responses are flat attribute soup
//! (`<post id="..." file_url="..." .../>`), served by installations that
//! frequently interleave them with anti-bot HTML, so elements are scanned
//! with anchored regexes rather than a strict XML parse; a body with no
//! recognizable root is a parse failure the orchestrator can classify.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::booru::adapter::{AdapterError, AdapterResult, SearchQuery, SourceAdapter};
use crate::booru::parse::{
    absolute_url, fix_thumbs_subdomain, parse_int, parse_positive_u32, parse_unix_time,
    single_tag_group,
};
use crate::booru::post::{Post, PostDetails, Rating, SharedPost};
use crate::booru::site::{BooruSite, Credentials};
use crate::booru::transport::HttpTransport;

/// `<post ...>` elements; `\b` keeps the `<posts>` root from matching.
static POST_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<post\b([^>]*?)/?>"#).expect("post element regex"));

/// Attribute pairs inside an element.
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).expect("attribute regex")
});

#[derive(Clone)]
pub struct DapiAdapter {
    transport: HttpTransport,
}

impl DapiAdapter {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    pub(crate) fn search_url(query: &SearchQuery) -> String {
        let mut url = format!(
            "{}/index.php?page=dapi&s=post&q=index&limit={}&pid={}&tags={}",
            query.site.base_url(),
            query.page_size,
            query.page.saturating_sub(1),
            urlencode(query.tags.trim()),
        );
        append_auth(&mut url, query.site, query.usable_credentials());
        url
    }

    fn lookup_url(site: BooruSite, id: &str, credentials: Option<&Credentials>) -> String {
        let mut url = format!(
            "{}/index.php?page=dapi&s=post&q=index&id={}",
            site.base_url(),
            urlencode(id.trim()),
        );
        append_auth(&mut url, site, credentials.filter(|c| c.is_usable()));
        url
    }

    /// Parse every `<post .../>` element in a response body.
    fn parse_posts(site: BooruSite, body: &str) -> AdapterResult<Vec<SharedPost>> {
        if !body.contains("<posts") && !body.contains("<post") {
            return Err(AdapterError::Parse(
                "response body has no post list root".to_string(),
            ));
        }

        let mut out = Vec::new();
        for element in POST_ELEMENT.captures_iter(body) {
            let attrs = parse_attributes(&element[1]);
            match normalize(site, &attrs) {
                Some(post) => out.push(post),
                None => warn!(site = %site, "skipping malformed post element"),
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for DapiAdapter {
    async fn search(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>> {
        let url = Self::search_url(query);
        let body = self
            .transport
            .get_text(&url, query.site.requires_browser_user_agent())
            .await?;

        if body.trim().is_empty() {
            return Err(AdapterError::EmptyBody);
        }

        Self::parse_posts(query.site, &body)
    }

    async fn post_by_id(
        &self,
        site: BooruSite,
        id: &str,
        credentials: Option<&Credentials>,
    ) -> AdapterResult<Option<SharedPost>> {
        let url = Self::lookup_url(site, id, credentials);
        let body = self
            .transport
            .get_text(&url, site.requires_browser_user_agent())
            .await?;

        if body.trim().is_empty() {
            return Err(AdapterError::EmptyBody);
        }

        Ok(Self::parse_posts(site, &body)?.into_iter().next())
    }
}

fn append_auth(url: &mut String, site: BooruSite, credentials: Option<&Credentials>) {
    if !site.supports_api_key_auth() {
        return;
    }
    if let Some(creds) = credentials {
        url.push_str("&user_id=");
        url.push_str(&urlencode(creds.username.trim()));
        url.push_str("&api_key=");
        url.push_str(&urlencode(creds.secret.trim()));
    }
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for capture in ATTRIBUTE.captures_iter(raw) {
        let name = capture[1].to_lowercase();
        let value = html_escape::decode_html_entities(&capture[2]).to_string();
        attrs.insert(name, value);
    }
    attrs
}

/// Build a post from one element's attributes, applying the priority-order
/// URL fallbacks. Records that end up without both a preview and a full
/// URL are dropped.
fn normalize(site: BooruSite, attrs: &HashMap<String, String>) -> Option<SharedPost> {
    let id = attrs.get("id").map(|s| s.trim()).unwrap_or_default();
    if id.is_empty() {
        return None;
    }

    let preview_raw = attrs
        .get("preview_url")
        .or_else(|| attrs.get("sample_url"))
        .or_else(|| attrs.get("file_url"))
        .cloned()
        .unwrap_or_default();
    let full_raw = attrs
        .get("file_url")
        .or_else(|| attrs.get("sample_url"))
        .cloned()
        .unwrap_or_else(|| preview_raw.clone());

    let mut preview = absolute_url(site.base_url(), &preview_raw);
    let mut full = absolute_url(site.base_url(), &full_raw);
    if site.uses_thumbs_subdomain_fix() {
        preview = fix_thumbs_subdomain(&preview);
        full = fix_thumbs_subdomain(&full);
    }

    if preview.trim().is_empty() || full.trim().is_empty() {
        return None;
    }

    let mut width = attrs.get("width").map_or(0, |v| parse_positive_u32(v));
    if width == 0 {
        width = attrs.get("sample_width").map_or(0, |v| parse_positive_u32(v));
    }
    let mut height = attrs.get("height").map_or(0, |v| parse_positive_u32(v));
    if height == 0 {
        height = attrs
            .get("sample_height")
            .map_or(0, |v| parse_positive_u32(v));
    }

    let tags = attrs.get("tags").cloned().unwrap_or_default();
    let tags = tags.trim().to_string();

    Some(Post::new(
        site,
        id,
        PostDetails {
            preview_url: preview,
            full_url: full,
            post_url: format!(
                "{}/index.php?page=post&s=view&id={}",
                site.base_url(),
                id
            ),
            rating: Rating::parse(attrs.get("rating").map(String::as_str).unwrap_or_default()),
            tag_groups: single_tag_group(&tags),
            tags,
            score: attrs.get("score").map_or(0, |v| parse_int(v)),
            created_at_unix: attrs.get("created_at").map_or(0, |v| parse_unix_time(v)),
            width,
            height,
        },
    ))
}

fn urlencode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
