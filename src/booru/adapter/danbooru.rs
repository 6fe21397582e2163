//! JSON-REST adapter for the danbooru family.
//!
//! Response shape: a root array (single lookups return a bare object),
//! flat fields (`file_url`, `preview_file_url`, `image_width`), and
//! space-separated `tag_string_*` properties per tag category. Auth rides
//! the query string as `login`/`api_key`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::booru::adapter::{AdapterError, AdapterResult, SearchQuery, SourceAdapter};
use crate::booru::parse::{
    json_int, json_str, json_unix_time, preferred_display_tags, split_tags,
};
use crate::booru::post::{Post, PostDetails, Rating, SharedPost, TagGroups};
use crate::booru::site::{BooruSite, Credentials};
use crate::booru::transport::HttpTransport;

/// (json property, canonical group) pairs, in display priority order.
const TAG_GROUP_FIELDS: [(&str, &str); 5] = [
    ("tag_string_artist", "Artist"),
    ("tag_string_character", "Character"),
    ("tag_string_copyright", "Copyright"),
    ("tag_string_meta", "Meta"),
    ("tag_string_general", "General"),
];

#[derive(Clone)]
pub struct DanbooruAdapter {
    transport: HttpTransport,
    base_url: String,
}

impl DanbooruAdapter {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            base_url: BooruSite::Danbooru.base_url().to_string(),
        }
    }

    fn auth_params(credentials: Option<&Credentials>) -> Vec<(&'static str, String)> {
        match credentials.filter(|c| c.is_usable()) {
            Some(creds) => vec![
                ("login", creds.username.trim().to_string()),
                ("api_key", creds.secret.trim().to_string()),
            ],
            None => Vec::new(),
        }
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> AdapterResult<Value> {
        let response = self.transport.client().get(url).query(params).send().await?;
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

    /// Credential validation against the profile endpoint.
    pub async fn check_credentials(&self, credentials: &Credentials) -> AdapterResult<bool> {
        let url = format!("{}/profile.json", self.base_url);
        let params = Self::auth_params(Some(credentials));
        let response = self.transport.client().get(&url).query(&params).send().await?;
        Ok(response.status().is_success())
    }

    fn normalize(&self, element: &Value) -> Option<SharedPost> {
        let id = json_str(element, "id")?;
        if id.trim().is_empty() {
            return None;
        }

        let preview = json_str(element, "preview_file_url").unwrap_or_default();
        let full = json_str(element, "file_url")
            .or_else(|| json_str(element, "large_file_url"))
            .unwrap_or_else(|| preview.clone());

        let preview = self.absolute(&preview);
        let full = self.absolute(&full);
        if preview.trim().is_empty() || full.trim().is_empty() {
            return None;
        }

        let mut width = json_int(element, "image_width");
        if width <= 0 {
            width = json_int(element, "width");
        }
        let mut height = json_int(element, "image_height");
        if height <= 0 {
            height = json_int(element, "height");
        }

        let tag_groups = extract_tag_groups(element);
        let flat = json_str(element, "tag_string").unwrap_or_default();
        let tags = preferred_display_tags(&tag_groups, &flat);

        Some(Post::new(
            BooruSite::Danbooru,
            &id,
            PostDetails {
                preview_url: preview,
                full_url: full,
                post_url: format!("{}/posts/{}", self.base_url, id.trim()),
                rating: Rating::parse(&json_str(element, "rating").unwrap_or_default()),
                tags,
                tag_groups,
                score: json_int(element, "score"),
                created_at_unix: json_unix_time(element, "created_at"),
                width: width.max(0) as u32,
                height: height.max(0) as u32,
            },
        ))
    }

    /// Danbooru serves site-relative media paths for some asset classes.
    fn absolute(&self, raw: &str) -> String {
        let raw = raw.trim();
        if raw.is_empty() {
            return String::new();
        }
        if raw.starts_with('/') && !raw.starts_with("//") {
            return format!("{}{}", self.base_url, raw);
        }
        raw.to_string()
    }
}

#[async_trait]
impl SourceAdapter for DanbooruAdapter {
    async fn search(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>> {
        let url = format!("{}/posts.json", self.base_url);
        let mut params = vec![
            ("limit", query.page_size.to_string()),
            ("page", query.page.to_string()),
            ("tags", query.tags.trim().to_string()),
        ];
        params.extend(Self::auth_params(query.usable_credentials()));

        let body = self.get_json(&url, &params).await?;
        let Some(elements) = body.as_array() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
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
        let url = format!(
            "{}/posts/{}.json",
            self.base_url,
            url::form_urlencoded::byte_serialize(id.trim().as_bytes()).collect::<String>()
        );
        let params = Self::auth_params(credentials);

        let body = match self.get_json(&url, &params).await {
            Ok(body) => body,
            Err(AdapterError::Http { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        if !body.is_object() {
            return Ok(None);
        }

        Ok(self.normalize(&body))
    }
}

/// Split each `tag_string_*` property into a deduplicated group.
fn extract_tag_groups(element: &Value) -> TagGroups {
    let mut groups = TagGroups::new();
    for (field, group) in TAG_GROUP_FIELDS {
        let Some(raw) = json_str(element, field) else {
            continue;
        };
        let values = split_tags(&raw);
        if !values.is_empty() {
            groups.insert(group.to_string(), values);
        }
    }
    groups
}
