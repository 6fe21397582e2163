//! Public retrieval surface: site-to-adapter dispatch, response caching,
//! and credential validation.
//!
//! The adapter table is fixed at construction: one JSON adapter per
//! family, and the DAPI family wrapped in the fallback orchestrator. This
//! facade is also the boundary where single-post lookup failures collapse
//! to `None`; search failures keep propagating so the coordinator can end
//! the session with an error status.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::booru::adapter::danbooru::DanbooruAdapter;
use crate::booru::adapter::dapi::DapiAdapter;
use crate::booru::adapter::e621::E621Adapter;
use crate::booru::adapter::html::HtmlAdapter;
use crate::booru::adapter::{AdapterResult, SearchQuery, SourceAdapter};
use crate::booru::cache::{CacheConfig, CacheStats, ResponseCache};
use crate::booru::fallback::FallbackOrchestrator;
use crate::booru::post::{SharedPost, composite_key};
use crate::booru::site::{BooruSite, Credentials, JsonFamily, ProtocolKind};
use crate::booru::transport::HttpTransport;

pub struct BooruApi {
    e621: E621Adapter,
    danbooru: DanbooruAdapter,
    dapi: FallbackOrchestrator,
    cache: ResponseCache,
}

impl BooruApi {
    pub fn new(transport: HttpTransport, cache_config: CacheConfig) -> Self {
        info!("building adapter table for {} sites", BooruSite::ALL.len());
        Self {
            e621: E621Adapter::new(transport.clone()),
            danbooru: DanbooruAdapter::new(transport.clone()),
            dapi: FallbackOrchestrator::new(
                DapiAdapter::new(transport.clone()),
                HtmlAdapter::new(transport),
            ),
            cache: ResponseCache::new(cache_config),
        }
    }

    fn adapter_for(&self, site: BooruSite) -> &dyn SourceAdapter {
        match site.protocol() {
            ProtocolKind::JsonRest(JsonFamily::E621) => &self.e621,
            ProtocolKind::JsonRest(JsonFamily::Danbooru) => &self.danbooru,
            // The orchestrator serves both structured-first DAPI sites and
            // any future HTML-only site; it routes internally.
            ProtocolKind::XmlDapi | ProtocolKind::HtmlOnly => &self.dapi,
        }
    }

    /// Fetch one page of search results, unfiltered. Rating policy is the
    /// coordinator's concern.
    pub async fn search(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>> {
        if let Some(cached) = self.cache.get_search(query) {
            debug!(site = %query.site, page = query.page, "search page served from cache");
            return Ok(cached);
        }

        let posts = self.adapter_for(query.site).search(query).await?;
        self.cache.put_search(query, posts.clone());
        Ok(posts)
    }

    /// Resolve a single post. Every failure collapses to `None` here; a
    /// missing favorite is not worth an error state.
    pub async fn post_by_id(
        &self,
        site: BooruSite,
        id: &str,
        credentials: Option<&Credentials>,
    ) -> Option<SharedPost> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }

        let key = composite_key(site, id);
        if let Some(cached) = self.cache.get_lookup(&key) {
            return Some(cached);
        }

        match self.adapter_for(site).post_by_id(site, id, credentials).await {
            Ok(Some(post)) => {
                self.cache.put_lookup(post.clone());
                Some(post)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(site = %site, id, error = %err, "single-post lookup failed");
                None
            }
        }
    }

    /// Check a credential pair against the site. DAPI sites have no
    /// account probe endpoint and accept any pair. Never retried; network
    /// failures read as invalid.
    pub async fn validate_credentials(&self, site: BooruSite, credentials: &Credentials) -> bool {
        if !credentials.is_usable() {
            return false;
        }

        let result = match site {
            BooruSite::E621 => self.e621.check_credentials(credentials).await,
            BooruSite::Danbooru => self.danbooru.check_credentials(credentials).await,
            _ => Ok(true),
        };

        match result {
            Ok(valid) => valid,
            Err(err) => {
                warn!(site = %site, error = %err, "credential validation failed");
                false
            }
        }
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }
}

/// Retrieval seam consumed by the coordinator and the favorite store.
/// [`BooruApi`] is the production implementation; tests script their own.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search_page(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>>;

    async fn lookup_post(
        &self,
        site: BooruSite,
        id: &str,
        credentials: Option<&Credentials>,
    ) -> Option<SharedPost>;
}

#[async_trait]
impl SearchBackend for BooruApi {
    async fn search_page(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>> {
        self.search(query).await
    }

    async fn lookup_post(
        &self,
        site: BooruSite,
        id: &str,
        credentials: Option<&Credentials>,
    ) -> Option<SharedPost> {
        self.post_by_id(site, id, credentials).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booru::config::HttpConfig;

    fn api() -> BooruApi {
        let transport = HttpTransport::new(&HttpConfig::default()).expect("client builds");
        BooruApi::new(transport, CacheConfig::default())
    }

    #[tokio::test]
    async fn blank_credentials_are_invalid_without_a_network_call() {
        let creds = Credentials {
            username: "".into(),
            secret: "key".into(),
        };
        assert!(!api().validate_credentials(BooruSite::E621, &creds).await);
    }

    #[tokio::test]
    async fn dapi_sites_accept_any_usable_pair() {
        let creds = Credentials {
            username: "user".into(),
            secret: "key".into(),
        };
        assert!(api().validate_credentials(BooruSite::Safebooru, &creds).await);
        assert!(api().validate_credentials(BooruSite::Gelbooru, &creds).await);
    }

    #[tokio::test]
    async fn blank_id_lookup_short_circuits() {
        assert!(api().post_by_id(BooruSite::Safebooru, "  ", None).await.is_none());
    }
}
