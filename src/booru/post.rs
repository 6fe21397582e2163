//! Canonical post entity shared between the coordinator, the preview
//! scheduler, and the UI collaborator.
//!
//! A post's identity (site + site-local id) is fixed at creation; every
//! other attribute lives behind interior mutability so that one `Arc<Post>`
//! instance can be re-resolved, favorited, or given its preview image
//! while every holder observes the change. Change notification itself is
//! the UI adapter's job, delivered through the coordinator/scheduler event
//! stream rather than wired into the entity.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::booru::parse::is_sample_or_thumbnail_url;
use crate::booru::site::BooruSite;

/// Tag groups: canonical group name ("Artist", "Character", "General", ...)
/// to an ordered list of distinct tags.
pub type TagGroups = BTreeMap<String, Vec<String>>;

/// A post shared across the whole pipeline.
pub type SharedPost = Arc<Post>;

/// Content rating reported by a backend, collapsed to the canonical four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Safe,
    Questionable,
    Adult,
    /// Anything the synonym table does not recognize, including a missing
    /// rating. Unknown ratings pass every policy (fail-open; Safebooru
    /// depends on this observably).
    Unknown,
}

impl Rating {
    /// Collapse a raw backend token into a canonical rating.
    pub fn parse(raw: &str) -> Rating {
        match raw.trim().to_lowercase().as_str() {
            "s" | "safe" | "g" | "general" => Rating::Safe,
            "q" | "questionable" => Rating::Questionable,
            "e" | "explicit" | "adult" => Rating::Adult,
            _ => Rating::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rating::Safe => "safe",
            Rating::Questionable => "questionable",
            Rating::Adult => "adult",
            Rating::Unknown => "unknown",
        }
    }
}

/// Which rating categories a search session lets through.
#[derive(Debug, Clone, Copy, Default)]
pub struct RatingPolicy {
    pub allow_safe: bool,
    pub allow_questionable: bool,
    pub allow_adult: bool,
}

impl RatingPolicy {
    /// All flags off means the policy is disabled and everything passes.
    /// Unknown ratings pass regardless of the flags.
    pub fn matches(&self, rating: Rating) -> bool {
        if !self.allow_safe && !self.allow_questionable && !self.allow_adult {
            return true;
        }

        match rating {
            Rating::Safe => self.allow_safe,
            Rating::Questionable => self.allow_questionable,
            Rating::Adult => self.allow_adult,
            Rating::Unknown => true,
        }
    }
}

/// Opaque handle over fetched preview bytes. Pixel decode is the UI
/// collaborator's responsibility; this core guarantees a non-empty,
/// validated payload.
#[derive(Debug, Clone)]
pub struct PreviewImage {
    bytes: Arc<Vec<u8>>,
}

impl PreviewImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Mutable attributes of a post. Re-resolution (HTML sample-URL fixes,
/// favorite hydration) replaces individual fields, never the identity.
#[derive(Debug, Clone, Default)]
pub struct PostDetails {
    pub preview_url: String,
    pub full_url: String,
    pub post_url: String,
    pub rating: Rating,
    /// Flat display tag string, space separated.
    pub tags: String,
    pub tag_groups: TagGroups,
    pub score: i64,
    /// Seconds since epoch; 0 = unknown.
    pub created_at_unix: i64,
    /// Pixel dimensions; either both positive or both zero.
    pub width: u32,
    pub height: u32,
}

impl Default for Rating {
    fn default() -> Self {
        Rating::Unknown
    }
}

#[derive(Debug)]
pub struct Post {
    site: BooruSite,
    id: String,
    /// Precomputed `"{site}::{id}"` composite key.
    key: String,
    details: RwLock<PostDetails>,
    preview: RwLock<Option<PreviewImage>>,
    favorite: AtomicBool,
    selected: AtomicBool,
    preview_loaded: AtomicBool,
}

impl Post {
    /// Build a shared post. The id is trimmed once here; partial pixel
    /// dimensions are zeroed rather than trusted.
    pub fn new(site: BooruSite, id: &str, mut details: PostDetails) -> SharedPost {
        let id = id.trim().to_string();
        let key = composite_key(site, &id);

        if details.width == 0 || details.height == 0 {
            details.width = 0;
            details.height = 0;
        }

        Arc::new(Post {
            site,
            id,
            key,
            details: RwLock::new(details),
            preview: RwLock::new(None),
            favorite: AtomicBool::new(false),
            selected: AtomicBool::new(false),
            preview_loaded: AtomicBool::new(false),
        })
    }

    pub fn site(&self) -> BooruSite {
        self.site
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Composite key, the dedup and favorite-matching identity.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn details(&self) -> PostDetails {
        self.details.read().clone()
    }

    pub fn preview_url(&self) -> String {
        self.details.read().preview_url.clone()
    }

    pub fn full_url(&self) -> String {
        self.details.read().full_url.clone()
    }

    pub fn rating(&self) -> Rating {
        self.details.read().rating
    }

    pub fn score(&self) -> i64 {
        self.details.read().score
    }

    /// Date rank for ordering: creation time when known, otherwise the
    /// numeric id (ids are assigned in upload order on every backend).
    pub fn date_rank(&self) -> i64 {
        let details = self.details.read();
        if details.created_at_unix > 0 {
            return details.created_at_unix;
        }
        drop(details);
        self.id.parse::<i64>().unwrap_or(0)
    }

    pub fn pixel_area(&self) -> i64 {
        let details = self.details.read();
        if details.width > 0 && details.height > 0 {
            i64::from(details.width) * i64::from(details.height)
        } else {
            0
        }
    }

    /// Path component of the best media URL, for extension sniffing.
    pub fn media_path(&self) -> String {
        let details = self.details.read();
        let raw = if !details.full_url.trim().is_empty() {
            details.full_url.clone()
        } else {
            details.preview_url.clone()
        };
        drop(details);

        match url::Url::parse(&raw) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => raw,
        }
    }

    pub fn is_video(&self) -> bool {
        let path = self.media_path().to_lowercase();
        path.ends_with(".webm") || path.ends_with(".mp4")
    }

    /// Whether the full-media URL still needs resolution: missing, equal
    /// to the preview, or pointing at a sample/thumbnail variant.
    pub fn needs_media_resolution(&self) -> bool {
        let details = self.details.read();
        if details.full_url.trim().is_empty() {
            return true;
        }
        if details.full_url.eq_ignore_ascii_case(&details.preview_url) {
            return true;
        }
        is_sample_or_thumbnail_url(&details.full_url)
    }

    /// Merge re-resolved details into this post, keeping existing values
    /// where the resolved record is silent.
    pub fn apply_resolved_details(&self, resolved: &PostDetails) {
        let mut details = self.details.write();

        if !resolved.full_url.trim().is_empty() {
            details.full_url = resolved.full_url.clone();
        }
        if !resolved.preview_url.trim().is_empty() {
            details.preview_url = resolved.preview_url.clone();
        }
        if resolved.width > 0 && resolved.height > 0 {
            details.width = resolved.width;
            details.height = resolved.height;
        }
        if resolved.rating != Rating::Unknown {
            details.rating = resolved.rating;
        }
        if !resolved.tags.trim().is_empty() {
            details.tags = resolved.tags.clone();
        }
        details.score = resolved.score;
        if resolved.created_at_unix > 0 {
            details.created_at_unix = resolved.created_at_unix;
        }
        if !resolved.tag_groups.is_empty() {
            details.tag_groups = resolved.tag_groups.clone();
        }
    }

    pub fn preview(&self) -> Option<PreviewImage> {
        self.preview.read().clone()
    }

    pub fn is_preview_loaded(&self) -> bool {
        self.preview_loaded.load(Ordering::Acquire)
    }

    /// Attach a fetched preview and mark the post loaded. Called by the
    /// scheduler exactly once per successful fetch.
    pub fn attach_preview(&self, image: PreviewImage) {
        *self.preview.write() = Some(image);
        self.preview_loaded.store(true, Ordering::Release);
    }

    pub fn is_favorite(&self) -> bool {
        self.favorite.load(Ordering::Acquire)
    }

    pub fn set_favorite(&self, favorite: bool) {
        self.favorite.store(favorite, Ordering::Release);
    }

    pub fn is_selected(&self) -> bool {
        self.selected.load(Ordering::Acquire)
    }

    pub fn set_selected(&self, selected: bool) {
        self.selected.store(selected, Ordering::Release);
    }
}

/// Canonical composite key: lowercase site key, trimmed id. The exact
/// format is load-bearing for favorite matching across restarts.
pub fn composite_key(site: BooruSite, id: &str) -> String {
    format!("{}::{}", site.key(), id.trim())
}

/// Split a composite key back into site and id. Accepts historical site
/// aliases; rejects keys with a blank half.
pub fn parse_composite_key(key: &str) -> Option<(BooruSite, String)> {
    let (site_part, id_part) = key.split_once("::")?;
    let site = BooruSite::from_key(site_part)?;
    let id = id_part.trim();
    if id.is_empty() {
        return None;
    }
    Some((site, id.to_string()))
}
