//! Failure-driven fallback from a structured DAPI call to HTML scraping.
//!
//! The orchestrator wraps the structured adapter for every DAPI site. For
//! sites flagged HTML-fallback-capable it classifies failures (a specific
//! trigger set of HTTP statuses, transport errors without a status,
//! unparsable or empty bodies, and silently-empty result pages) and
//! retries exactly once through the HTML path; everything else propagates
//! untouched. The HTML path itself never falls back further.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::booru::adapter::html::HtmlAdapter;
use crate::booru::adapter::dapi::DapiAdapter;
use crate::booru::adapter::{AdapterError, AdapterResult, SearchQuery, SourceAdapter};
use crate::booru::parse::is_sample_or_thumbnail_url;
use crate::booru::post::SharedPost;
use crate::booru::site::{BooruSite, Credentials, ProtocolKind};

/// Listing pages carry roughly this many posts regardless of the
/// requested page size; the paged fallback sizes its raw-page loop on it.
const HTML_POSTS_PER_PAGE_ESTIMATE: u32 = 28;

/// HTTP statuses that mean "the structured endpoint is blocked or down,
/// the HTML site itself may still be fine".
pub fn is_fallback_trigger_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 429 | 500 | 502 | 503 | 504 | 520..=526)
}

/// Whether a structured-path failure should be retried over HTML.
pub fn should_fall_back(site: BooruSite, error: &AdapterError) -> bool {
    if !site.html_fallback_capable() {
        return false;
    }

    match error {
        AdapterError::Http { status } => is_fallback_trigger_status(*status),
        // No status at all: DNS, TLS, connection reset. The HTML vhost is
        // served separately often enough to be worth one attempt.
        AdapterError::Network(_) => true,
        AdapterError::Parse(_) => true,
        AdapterError::EmptyBody => true,
    }
}

/// The scrape side of the fallback chain. `HtmlAdapter` is the production
/// implementation; tests substitute counters.
#[async_trait]
pub trait HtmlSource: Send + Sync {
    async fn fetch_list_page(
        &self,
        site: BooruSite,
        tags: &str,
        pid: u32,
    ) -> AdapterResult<Vec<SharedPost>>;

    async fn fetch_post_page(&self, site: BooruSite, id: &str) -> Option<SharedPost>;
}

#[async_trait]
impl HtmlSource for HtmlAdapter {
    async fn fetch_list_page(
        &self,
        site: BooruSite,
        tags: &str,
        pid: u32,
    ) -> AdapterResult<Vec<SharedPost>> {
        HtmlAdapter::fetch_list_page(self, site, tags, pid).await
    }

    async fn fetch_post_page(&self, site: BooruSite, id: &str) -> Option<SharedPost> {
        HtmlAdapter::fetch_post_page(self, site, id).await
    }
}

pub struct FallbackOrchestrator<S = DapiAdapter, H = HtmlAdapter>
where
    S: SourceAdapter,
    H: HtmlSource,
{
    structured: S,
    html: H,
}

impl<S, H> FallbackOrchestrator<S, H>
where
    S: SourceAdapter,
    H: HtmlSource,
{
    pub fn new(structured: S, html: H) -> Self {
        Self { structured, html }
    }

    /// Satisfy one logical page from raw HTML listing pages.
    ///
    /// A listing page holds ~28 posts however large the logical page is,
    /// so enough raw pages are fetched sequentially to cover `page_size`,
    /// stopping early once the quota is met or a page comes back empty.
    /// Ids are deduplicated within the pass; a post sitting on the
    /// boundary of two raw pages must not appear twice.
    async fn html_paged_search(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>> {
        let page_size = query.page_size.max(1);
        let pages_per_request = page_size.div_ceil(HTML_POSTS_PER_PAGE_ESTIMATE).max(1);
        let start_pid = query.page.saturating_sub(1) * pages_per_request;

        let mut posts: Vec<SharedPost> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for offset in 0..pages_per_request {
            let pid = start_pid + offset;
            let page = match self.html.fetch_list_page(query.site, &query.tags, pid).await {
                Ok(page) => page,
                Err(err) => {
                    debug!(site = %query.site, pid, error = %err, "html listing fetch failed, stopping pass");
                    break;
                }
            };

            if page.is_empty() {
                break;
            }

            for post in page {
                if !seen_ids.insert(post.id().to_lowercase()) {
                    continue;
                }
                posts.push(post);
                if posts.len() >= page_size as usize {
                    return Ok(posts);
                }
            }
        }

        Ok(posts)
    }

    /// Re-resolve a structured lookup whose full-media URL is suspect
    /// (echoes the preview, or matches the sample/thumbnail path
    /// heuristics). The HTML record wins only when it is demonstrably
    /// different and not itself a sample.
    async fn resolve_suspect_media(
        &self,
        site: BooruSite,
        id: &str,
        structured: SharedPost,
    ) -> Option<SharedPost> {
        if !structured.needs_media_resolution() {
            return Some(structured);
        }

        if let Some(resolved) = self.html.fetch_post_page(site, id).await {
            let details = resolved.details();
            if !details.full_url.trim().is_empty()
                && !details.full_url.eq_ignore_ascii_case(&details.preview_url)
                && !is_sample_or_thumbnail_url(&details.full_url)
            {
                return Some(resolved);
            }
        }

        Some(structured)
    }
}

#[async_trait]
impl<S, H> SourceAdapter for FallbackOrchestrator<S, H>
where
    S: SourceAdapter,
    H: HtmlSource,
{
    async fn search(&self, query: &SearchQuery) -> AdapterResult<Vec<SharedPost>> {
        if matches!(query.site.protocol(), ProtocolKind::HtmlOnly) {
            return self.html_paged_search(query).await;
        }

        match self.structured.search(query).await {
            Ok(posts) if posts.is_empty() && query.site.html_fallback_capable() => {
                debug!(site = %query.site, page = query.page, "structured search came back empty, trying html listing");
                self.html_paged_search(query).await
            }
            Ok(posts) => Ok(posts),
            Err(err) if should_fall_back(query.site, &err) => {
                warn!(site = %query.site, page = query.page, error = %err, "structured search unusable, falling back to html");
                self.html_paged_search(query).await
            }
            Err(err) => Err(err),
        }
    }

    async fn post_by_id(
        &self,
        site: BooruSite,
        id: &str,
        credentials: Option<&Credentials>,
    ) -> AdapterResult<Option<SharedPost>> {
        if matches!(site.protocol(), ProtocolKind::HtmlOnly) {
            return Ok(self.html.fetch_post_page(site, id).await);
        }

        let structured = match self.structured.post_by_id(site, id, credentials).await {
            Ok(found) => found,
            Err(err) if should_fall_back(site, &err) => {
                warn!(site = %site, id, error = %err, "structured lookup unusable, falling back to html");
                return Ok(self.html.fetch_post_page(site, id).await);
            }
            Err(err) => return Err(err),
        };

        match structured {
            Some(post) => Ok(self.resolve_suspect_media(site, id, post).await),
            None if site.html_fallback_capable() => {
                Ok(self.html.fetch_post_page(site, id).await)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booru::post::{Post, PostDetails};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn post(site: BooruSite, id: &str, preview: &str, full: &str) -> SharedPost {
        Post::new(
            site,
            id,
            PostDetails {
                preview_url: preview.to_string(),
                full_url: full.to_string(),
                post_url: format!("{}/index.php?page=post&s=view&id={id}", site.base_url()),
                ..PostDetails::default()
            },
        )
    }

    /// Structured side scripted to fail or answer per call.
    struct ScriptedStructured {
        search_result: Mutex<Option<AdapterResult<Vec<SharedPost>>>>,
        lookup_result: Mutex<Option<AdapterResult<Option<SharedPost>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedStructured {
        fn failing(status: u16) -> Self {
            Self {
                search_result: Mutex::new(Some(Err(AdapterError::Http { status }))),
                lookup_result: Mutex::new(Some(Err(AdapterError::Http { status }))),
                calls: AtomicUsize::new(0),
            }
        }

        fn searching(posts: Vec<SharedPost>) -> Self {
            Self {
                search_result: Mutex::new(Some(Ok(posts))),
                lookup_result: Mutex::new(Some(Ok(None))),
                calls: AtomicUsize::new(0),
            }
        }

        fn looking_up(found: Option<SharedPost>) -> Self {
            Self {
                search_result: Mutex::new(Some(Ok(Vec::new()))),
                lookup_result: Mutex::new(Some(Ok(found))),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedStructured {
        async fn search(&self, _query: &SearchQuery) -> AdapterResult<Vec<SharedPost>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.search_result.lock().unwrap().take().expect("one search call")
        }

        async fn post_by_id(
            &self,
            _site: BooruSite,
            _id: &str,
            _credentials: Option<&Credentials>,
        ) -> AdapterResult<Option<SharedPost>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.lookup_result.lock().unwrap().take().expect("one lookup call")
        }
    }

    /// HTML side handing out canned listing pages and counting calls.
    struct CannedHtml {
        pages: Vec<Vec<SharedPost>>,
        post_page: Option<SharedPost>,
        list_calls: AtomicUsize,
        page_calls: AtomicUsize,
    }

    impl CannedHtml {
        fn new(pages: Vec<Vec<SharedPost>>) -> Self {
            Self {
                pages,
                post_page: None,
                list_calls: AtomicUsize::new(0),
                page_calls: AtomicUsize::new(0),
            }
        }

        fn with_post_page(mut self, post: Option<SharedPost>) -> Self {
            self.post_page = post;
            self
        }
    }

    #[async_trait]
    impl HtmlSource for CannedHtml {
        async fn fetch_list_page(
            &self,
            _site: BooruSite,
            _tags: &str,
            pid: u32,
        ) -> AdapterResult<Vec<SharedPost>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages.get(pid as usize).cloned().unwrap_or_default())
        }

        async fn fetch_post_page(&self, _site: BooruSite, _id: &str) -> Option<SharedPost> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            self.post_page.clone()
        }
    }

    #[test]
    fn trigger_set_matches_the_anti_bot_and_server_error_statuses() {
        for status in [401, 403, 429, 500, 502, 503, 504, 520, 521, 522, 523, 524, 525, 526] {
            assert!(is_fallback_trigger_status(status), "{status} should trigger");
        }
        for status in [200, 301, 400, 404, 410, 418, 501] {
            assert!(!is_fallback_trigger_status(status), "{status} should not trigger");
        }
    }

    #[test]
    fn non_capable_sites_never_fall_back() {
        let err = AdapterError::Http { status: 403 };
        assert!(should_fall_back(BooruSite::Gelbooru, &err));
        assert!(!should_fall_back(BooruSite::Safebooru, &err));
        assert!(!should_fall_back(BooruSite::XBooru, &err));
    }

    #[tokio::test]
    async fn http_403_invokes_the_html_path_exactly_once() {
        let gel = BooruSite::Gelbooru;
        let page: Vec<SharedPost> = (0..5)
            .map(|i| post(gel, &format!("{i}"), &format!("https://g/t{i}.jpg"), &format!("https://g/t{i}.jpg")))
            .collect();
        let orchestrator =
            FallbackOrchestrator::new(ScriptedStructured::failing(403), CannedHtml::new(vec![page]));

        let query = SearchQuery::new(gel, "", 1, 20);
        let results = orchestrator.search(&query).await.unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(orchestrator.structured.calls.load(Ordering::SeqCst), 1);
        // page_size 20 fits in one ~28-post raw page: exactly one fetch.
        assert_eq!(orchestrator.html.list_calls.load(Ordering::SeqCst), 1);
        for found in &results {
            assert!(!found.preview_url().is_empty());
            assert!(!found.full_url().is_empty());
        }
    }

    #[tokio::test]
    async fn non_trigger_status_propagates_without_fallback() {
        let orchestrator = FallbackOrchestrator::new(
            ScriptedStructured::failing(404),
            CannedHtml::new(vec![vec![post(
                BooruSite::Gelbooru,
                "1",
                "https://g/t.jpg",
                "https://g/t.jpg",
            )]]),
        );

        let query = SearchQuery::new(BooruSite::Gelbooru, "", 1, 20);
        let err = orchestrator.search(&query).await.unwrap_err();
        assert!(matches!(err, AdapterError::Http { status: 404 }));
        assert_eq!(orchestrator.html.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn silently_empty_structured_page_falls_back() {
        let gel = BooruSite::Gelbooru;
        let orchestrator = FallbackOrchestrator::new(
            ScriptedStructured::searching(Vec::new()),
            CannedHtml::new(vec![vec![post(gel, "7", "https://g/7.jpg", "https://g/7.jpg")]]),
        );

        let query = SearchQuery::new(gel, "", 1, 20);
        let results = orchestrator.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn paged_fallback_dedups_across_raw_pages_and_stops_at_quota() {
        let gel = BooruSite::Gelbooru;
        // 30 posts on the first raw page, the last one repeated at the top
        // of the second page, plenty more behind it.
        let first: Vec<SharedPost> = (0..30)
            .map(|i| post(gel, &format!("{i}"), &format!("https://g/{i}.jpg"), &format!("https://g/{i}.jpg")))
            .collect();
        let mut second = vec![post(gel, "29", "https://g/29.jpg", "https://g/29.jpg")];
        second.extend((30..60).map(|i| {
            post(gel, &format!("{i}"), &format!("https://g/{i}.jpg"), &format!("https://g/{i}.jpg"))
        }));

        let orchestrator = FallbackOrchestrator::new(
            ScriptedStructured::failing(429),
            CannedHtml::new(vec![first, second]),
        );

        let query = SearchQuery::new(gel, "", 1, 40);
        let results = orchestrator.search(&query).await.unwrap();

        assert_eq!(results.len(), 40);
        let mut ids: Vec<_> = results.iter().map(|p| p.id().to_string()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 40, "no id may appear twice in one pass");
        // page_size 40 at ~28/page means exactly two raw fetches.
        assert_eq!(orchestrator.html.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sample_url_lookup_is_reresolved_only_when_html_is_better() {
        let gel = BooruSite::Gelbooru;
        let suspect = post(
            gel,
            "12",
            "https://img.g/thumbnails/a/thumbnail_12.jpg",
            "https://img.g/samples/a/sample_12.jpg",
        );

        // HTML yields a real original: it replaces the sample record.
        let better = post(
            gel,
            "12",
            "https://img.g/thumbnails/a/thumbnail_12.jpg",
            "https://img.g/images/a/12.png",
        );
        let orchestrator = FallbackOrchestrator::new(
            ScriptedStructured::looking_up(Some(suspect.clone())),
            CannedHtml::new(Vec::new()).with_post_page(Some(better)),
        );
        let resolved = orchestrator
            .post_by_id(gel, "12", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.full_url(), "https://img.g/images/a/12.png");

        // HTML yields another sample: the structured record is kept.
        let still_sample = post(
            gel,
            "12",
            "https://img.g/thumbnails/a/thumbnail_12.jpg",
            "https://img.g/samples/a/sample_12_alt.jpg",
        );
        let orchestrator = FallbackOrchestrator::new(
            ScriptedStructured::looking_up(Some(suspect.clone())),
            CannedHtml::new(Vec::new()).with_post_page(Some(still_sample)),
        );
        let resolved = orchestrator
            .post_by_id(gel, "12", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.full_url(), "https://img.g/samples/a/sample_12.jpg");

        // A clean original is never re-resolved.
        let clean = post(
            gel,
            "13",
            "https://img.g/thumbnails/a/thumbnail_13.jpg",
            "https://img.g/images/a/13.png",
        );
        let orchestrator = FallbackOrchestrator::new(
            ScriptedStructured::looking_up(Some(clean)),
            CannedHtml::new(Vec::new()).with_post_page(None),
        );
        let resolved = orchestrator
            .post_by_id(gel, "13", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.full_url(), "https://img.g/images/a/13.png");
        assert_eq!(orchestrator.html.page_calls.load(Ordering::SeqCst), 0);
    }
}
