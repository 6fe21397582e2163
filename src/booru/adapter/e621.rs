//! JSON-REST adapter for the e621 family.
//!
//! Response shape: `{"posts": [...]}` wrapper (single lookups use a
//! `{"post": {...}}` wrapper), nested `file`/`sample`/`preview` objects,
//! `score.total`, and categorized tag arrays. Auth is HTTP Basic with the
//! API key as password.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header;
use serde_json::Value;
use tracing::{debug, warn};

use crate::booru::adapter::{AdapterError, AdapterResult, SearchQuery, SourceAdapter};
use crate::booru::parse::{
    json_nested_int, json_nested_str, json_str, json_unix_time, preferred_display_tags,
};
use crate::booru::post::{Post, PostDetails, Rating, SharedPost, TagGroups};
use crate::booru::site::{BooruSite, Credentials};
use crate::booru::transport::HttpTransport;

#[derive(Clone)]
pub struct E621Adapter {
    transport: HttpTransport,
    base_url: String,
}

impl E621Adapter {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            base_url: BooruSite::E621.base_url().to_string(),
        }
    }

    /// `Basic base64(user:key)`, attached only when both halves exist.
    fn auth_header(credentials: Option<&Credentials>) -> Option<String> {
        let creds = credentials.filter(|c| c.is_usable())?;
        let raw = format!("{}:{}", creds.username.trim(), creds.secret.trim());
        Some(format!("Basic {}", BASE64.encode(raw)))
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        credentials: Option<&Credentials>,
    ) -> AdapterResult<Value> {
        let mut request = self.transport.client().get(url).query(query);
        if let Some(auth) = Self::auth_header(credentials) {
            request = request.header(header::AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Http {
                status: status.as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|err| AdapterError::Parse(err.to_string()))
    }

    /// Used by credential validation: any authenticated 2xx will do.
    pub async fn check_credentials(&self, credentials: &Credentials) -> AdapterResult<bool> {
        let url = format!("{}/users.json", self.base_url);
        let mut request = self
            .transport
            .client()
            .get(&url)
            .query(&[("limit", "1")]);
        if let Some(auth) = Self::auth_header(Some(credentials)) {
            request = request.header(header::AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        Ok(response.status().is_success())
    }

    fn normalize(&self, element: &Value) -> Option<SharedPost> {
        let id = json_str(element, "id")?;
        if id.trim().is_empty() {
            return None;
        }

        let preview = json_nested_str(element, "sample", "url")
            .or_else(|| json_nested_str(element, "preview", "url"))
            .unwrap_or_default();
        let full = json_nested_str(element, "file", "url").unwrap_or_else(|| preview.clone());

        if preview.trim().is_empty() || full.trim().is_empty() {
            return None;
        }

        let mut width = json_nested_int(element, "file", "width");
        if width <= 0 {
            width = json_nested_int(element, "sample", "width");
        }
        if width <= 0 {
            width = json_nested_int(element, "preview", "width");
        }

        let mut height = json_nested_int(element, "file", "height");
        if height <= 0 {
            height = json_nested_int(element, "sample", "height");
        }
        if height <= 0 {
            height = json_nested_int(element, "preview", "height");
        }

        let tag_groups = extract_tag_groups(element);
        let flat_tags = flat_general_tags(element);
        let tags = preferred_display_tags(&tag_groups, &flat_tags);

        Some(Post::new(
            BooruSite::E621,
            &id,
            PostDetails {
                preview_url: preview,
                full_url: full,
                post_url: format!("{}/posts/{}", self.base_url, id.trim()),
                rating: Rating::parse(&json_str(element, "rating").unwrap_or_default()),
                tags,
                tag_groups,
                score: json_nested_int(element, "score", "total"),
                created_at_unix: json_unix_time(element, "created_at"),
                width: width.max(0) as u32,
                height: height.max(0) as u32,
            },
        ))
    }
}

#[async_trait]
impl SourceAdapter for E621Adapter {
    async fn search(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>> {
        let url = format!("{}/posts.json", self.base_url);
        let params = [
            ("limit", query.page_size.to_string()),
            ("page", query.page.to_string()),
            ("tags", query.tags.trim().to_string()),
        ];

        let body = self
            .get_json(&url, &params, query.usable_credentials())
            .await?;

        let Some(posts) = body.get("posts").and_then(Value::as_array) else {
            debug!(site = %query.site, "posts wrapper missing, treating as empty page");
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(posts.len());
        for element in posts {
            match self.normalize(element) {
                Some(post) => out.push(post),
                None => warn!(site = %query.site, "skipping malformed post record"),
            }
        }

        Ok(out)
    }

    async fn post_by_id(
        &self,
        _site: BooruSite,
        id: &str,
        credentials: Option<&Credentials>,
    ) -> AdapterResult<Option<SharedPost>> {
        let id = id.trim();
        let url = format!("{}/posts/{}.json", self.base_url, urlencode(id));

        let body = match self.get_json(&url, &[], credentials).await {
            Ok(body) => body,
            // A failed lookup of one post is not worth a fallback chain.
            Err(AdapterError::Http { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        let Some(element) = body.get("post").filter(|p| p.is_object()) else {
            return Ok(None);
        };

        Ok(self.normalize(element))
    }
}

/// Categorized tag arrays (`artist`/`character`/`species`/...) mapped onto
/// canonical group names, each group deduplicated case-insensitively.
fn extract_tag_groups(element: &Value) -> TagGroups {
    let mut groups = TagGroups::new();
    let Some(tags) = element.get("tags").and_then(Value::as_object) else {
        return groups;
    };

    for (name, value) in tags {
        let Some(values) = value.as_array() else {
            continue;
        };

        let mut seen: Vec<String> = Vec::new();
        let mut list = Vec::new();
        for entry in values {
            let Some(tag) = entry.as_str() else {
                continue;
            };
            let tag = tag.trim();
            if tag.is_empty() {
                continue;
            }
            let folded = tag.to_lowercase();
            if seen.contains(&folded) {
                continue;
            }
            seen.push(folded);
            list.push(tag.to_string());
        }

        if !list.is_empty() {
            groups.insert(crate::booru::parse::canonical_group_name(name), list);
        }
    }

    groups
}

/// Fallback display string: the raw `general` array joined with spaces.
fn flat_general_tags(element: &Value) -> String {
    let Some(general) = element
        .get("tags")
        .and_then(|t| t.get("general"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };

    general
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn urlencode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
