//! Source adapters: one implementation per backend protocol family.
//!
//! An adapter owns URL construction, auth attachment, and response parsing
//! for its family, and produces canonical [`SharedPost`] records. Network
//! and parse failures propagate out of `search` so the fallback
//! orchestrator can classify them; the API facade is the boundary where
//! single-post lookup failures collapse to `None`.

use async_trait::async_trait;
use thiserror::Error;

use crate::booru::post::SharedPost;
use crate::booru::site::{BooruSite, Credentials};

pub mod danbooru;
pub mod dapi;
pub mod e621;
pub mod html;

/// Error types for adapter operations.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("request error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("empty response body")]
    EmptyBody,
}

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// One page worth of search input.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub site: BooruSite,
    /// Raw tag expression, passed through to the backend.
    pub tags: String,
    /// 1-based logical page.
    pub page: u32,
    pub page_size: u32,
    pub credentials: Option<Credentials>,
}

impl SearchQuery {
    pub fn new(site: BooruSite, tags: impl Into<String>, page: u32, page_size: u32) -> Self {
        Self {
            site,
            tags: tags.into(),
            page,
            page_size,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Credentials only when both halves are present.
    pub fn usable_credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref().filter(|c| c.is_usable())
    }
}

/// A structured backend translator. Implementations exist per protocol
/// family; the facade selects one from a table built at startup.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch one page of posts. Failures propagate; individual malformed
    /// records inside an otherwise healthy page are skipped.
    async fn search(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>>;

    /// Look up a single post. `Ok(None)` means the backend answered but
    /// has no usable record; transport/parse failures are `Err` so the
    /// orchestrator can fall back before the facade swallows them.
    async fn post_by_id(
        &self,
        site: BooruSite,
        id: &str,
        credentials: Option<&Credentials>,
    ) -> AdapterResult<Option<SharedPost>>;
}
