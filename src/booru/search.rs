//! Search session coordination.
//!
//! One session at a time owns the master post list: a new query bumps the
//! generation counter, and every mutation by an older session's task
//! re-checks the generation under the state lock before touching
//! anything. That single-writer discipline replaces per-field locking;
//! the lock is never held across an await. Pages load strictly in order,
//! each applied before the next is requested; an empty or all-duplicate
//! page ends the session, and the page ceiling is only raised in fixed
//! batches by an explicit load-more.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::booru::adapter::{AdapterResult, SearchQuery};
use crate::booru::api::SearchBackend;
use crate::booru::favorites::FavoriteStore;
use crate::booru::filter::{ResultSort, VisibleFilter, order_posts};
use crate::booru::post::{RatingPolicy, SharedPost};
use crate::booru::preview::{PreviewScheduler, TIER_NORMAL, TIER_VISIBLE};
use crate::booru::site::{BooruSite, CredentialsProvider};

/// Events the UI collaborator consumes. The post sequence is append-only
/// between `ResultsCleared` markers.
#[derive(Debug, Clone)]
pub enum UiEvent {
    ResultsCleared,
    PostsAppended(Vec<SharedPost>),
    Status(String),
    Loading(bool),
    PreviewLoaded(SharedPost),
}

/// Session lifecycle. `Searching` covers the whole page loop; the other
/// states are where a session comes to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Searching,
    HasMore,
    Exhausted,
    Error,
}

/// What to search. Changing any field means a new session.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub site: BooruSite,
    pub tags: String,
    pub page_size: u32,
    pub rating: RatingPolicy,
}

impl SearchRequest {
    pub fn new(site: BooruSite, tags: impl Into<String>) -> Self {
        Self {
            site,
            tags: tags.into(),
            page_size: 40,
            rating: RatingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Page ceiling for a fresh session.
    pub initial_page_limit: u32,
    /// How much a load-more raises the ceiling.
    pub page_batch: u32,
    /// How many neighbors of the visible range get tier-0 treatment.
    pub visible_lookahead: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_page_limit: 10,
            page_batch: 10,
            visible_lookahead: 12,
        }
    }
}

struct SessionState {
    request: SearchRequest,
    session_id: Uuid,
    posts: Vec<SharedPost>,
    seen_keys: HashSet<String>,
    next_page: u32,
    page_ceiling: u32,
    has_more: bool,
    loading: bool,
    phase: SessionPhase,
    status: String,
    visible_filter: VisibleFilter,
    sort: ResultSort,
}

pub struct SearchCoordinator {
    backend: Arc<dyn SearchBackend>,
    scheduler: Arc<PreviewScheduler>,
    credentials: Arc<dyn CredentialsProvider>,
    favorites: Arc<FavoriteStore>,
    events: mpsc::UnboundedSender<UiEvent>,
    config: SearchConfig,
    /// Current session generation; stale tasks compare against it before
    /// every mutation.
    generation: AtomicU64,
    state: Mutex<SessionState>,
}

impl SearchCoordinator {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        scheduler: Arc<PreviewScheduler>,
        credentials: Arc<dyn CredentialsProvider>,
        favorites: Arc<FavoriteStore>,
        events: mpsc::UnboundedSender<UiEvent>,
        config: SearchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            scheduler,
            credentials,
            favorites,
            events,
            config,
            generation: AtomicU64::new(0),
            state: Mutex::new(SessionState {
                request: SearchRequest::new(BooruSite::Safebooru, ""),
                session_id: Uuid::nil(),
                posts: Vec::new(),
                seen_keys: HashSet::new(),
                next_page: 1,
                page_ceiling: 0,
                has_more: false,
                loading: false,
                phase: SessionPhase::Idle,
                status: String::new(),
                visible_filter: VisibleFilter::default(),
                sort: ResultSort::default(),
            }),
        })
    }

    /// Begin a new session, cancelling whatever was in flight. The
    /// previous session's page task observes the bumped generation and
    /// exits without touching the cleared list.
    pub async fn start_search(&self, request: SearchRequest) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = Uuid::new_v4();
        info!(
            session = %session_id,
            site = %request.site,
            tags = %request.tags,
            page_size = request.page_size,
            "starting search session"
        );

        {
            let mut state = self.state.lock();
            state.request = request;
            state.session_id = session_id;
            state.posts.clear();
            state.seen_keys.clear();
            state.next_page = 1;
            state.page_ceiling = self.config.initial_page_limit;
            state.has_more = true;
            // A superseded session cannot clear this itself anymore; its
            // generation-guarded set_loading calls are no-ops from here.
            state.loading = false;
            state.phase = SessionPhase::Searching;
            state.status.clear();
        }
        self.emit(UiEvent::ResultsCleared);

        self.load_pages(generation).await;
    }

    /// Raise the page ceiling by one batch and keep loading. No-op when
    /// the session is exhausted, errored, or still loading.
    pub async fn load_more(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            if !self.is_current(generation) || state.loading || !state.has_more {
                return;
            }
            state.page_ceiling += self.config.page_batch;
            state.phase = SessionPhase::Searching;
        }
        self.load_pages(generation).await;
    }

    async fn load_pages(&self, generation: u64) {
        loop {
            let proceed = {
                let state = self.state.lock();
                self.is_current(generation)
                    && state.has_more
                    && state.next_page <= state.page_ceiling
            };
            if !proceed {
                break;
            }

            if !self.load_next_page(generation).await {
                break;
            }
            tokio::task::yield_now().await;
        }

        if !self.is_current(generation) {
            return;
        }

        let mut state = self.state.lock();
        if state.phase == SessionPhase::Searching {
            state.phase = if state.has_more {
                SessionPhase::HasMore
            } else {
                SessionPhase::Exhausted
            };
        }
        // The closing status reports counts whenever anything loaded,
        // even after a "No more results" page ended the loop.
        if !state.posts.is_empty() && state.phase != SessionPhase::Error {
            let status = loaded_status(&state);
            state.status = status.clone();
            drop(state);
            self.emit(UiEvent::Status(status));
        }
    }

    /// Load and apply one page. Returns false when the session should
    /// stop (exhausted, errored, or superseded).
    async fn load_next_page(&self, generation: u64) -> bool {
        let (request, page) = {
            let state = self.state.lock();
            if !self.is_current(generation) || state.loading || !state.has_more {
                return false;
            }
            (state.request.clone(), state.next_page)
        };

        self.set_loading(generation, true);
        self.set_status(generation, format!("Loading page {page}..."));

        let credentials = self.credentials.credentials_for(request.site);
        let query = SearchQuery::new(request.site, request.tags.clone(), page, request.page_size)
            .with_credentials(credentials);
        let result = self.backend.search_page(&query).await;

        let proceed = self.apply_page_result(generation, &request, result);
        self.set_loading(generation, false);
        proceed
    }

    /// All master-list mutation happens here, under one lock acquisition,
    /// after re-checking the generation. A superseded session falls out
    /// without contaminating the new one.
    fn apply_page_result(
        &self,
        generation: u64,
        request: &SearchRequest,
        result: AdapterResult<Vec<SharedPost>>,
    ) -> bool {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            debug!(session = %state.session_id, "dropping page result from superseded session");
            return false;
        }

        let results = match result {
            Ok(results) => results,
            Err(err) => {
                warn!(session = %state.session_id, error = %err, "page load failed, ending session");
                state.has_more = false;
                state.phase = SessionPhase::Error;
                let status = format!("Error: {err}");
                state.status = status.clone();
                drop(state);
                self.emit(UiEvent::Status(status));
                return false;
            }
        };

        // Rating policy applies only where the site's rating metadata is
        // worth anything; unknown tokens fail open inside the policy.
        let results: Vec<SharedPost> = results
            .into_iter()
            .filter(|post| {
                !request.site.trusts_rating_metadata() || request.rating.matches(post.rating())
            })
            .collect();

        if results.is_empty() {
            state.has_more = false;
            state.phase = SessionPhase::Exhausted;
            let status = if state.posts.is_empty() {
                "No results".to_string()
            } else {
                "No more results".to_string()
            };
            state.status = status.clone();
            drop(state);
            self.emit(UiEvent::Status(status));
            return false;
        }

        let mut added = Vec::with_capacity(results.len());
        for post in results {
            if !state.seen_keys.insert(post.key().to_lowercase()) {
                continue;
            }
            self.favorites.mark_if_favorite(&post);
            state.posts.push(post.clone());
            added.push(post);
        }

        if added.is_empty() {
            state.has_more = false;
            state.phase = SessionPhase::Exhausted;
            let status = if state.posts.is_empty() {
                "No results".to_string()
            } else {
                loaded_status(&state)
            };
            state.status = status.clone();
            drop(state);
            self.emit(UiEvent::Status(status));
            return false;
        }

        state.next_page += 1;
        let status = loaded_status(&state);
        state.status = status.clone();
        drop(state);

        self.emit(UiEvent::Status(status));
        self.emit(UiEvent::PostsAppended(added.clone()));
        self.scheduler.request_many(&added, TIER_NORMAL);
        true
    }

    /// Scroll feedback: expedite what is on screen and promote a window
    /// of neighbors in both directions to the visible tier.
    pub fn mark_visible_range(&self, first: usize, last: usize) {
        let posts = {
            let state = self.state.lock();
            state.posts.clone()
        };
        if posts.is_empty() {
            return;
        }

        let last = last.min(posts.len().saturating_sub(1));
        for post in posts.iter().take(last + 1).skip(first.min(last)) {
            self.scheduler.expedite(post);
        }

        let lookahead = self.config.visible_lookahead;
        for post in posts.iter().skip(last + 1).take(lookahead) {
            self.scheduler.request(post, TIER_VISIBLE);
        }
        let back_start = first.min(last).saturating_sub(lookahead);
        for post in posts.iter().take(first.min(last)).skip(back_start) {
            self.scheduler.request(post, TIER_VISIBLE);
        }
    }

    /// Flip a favorite and keep the status line honest.
    pub fn toggle_favorite(&self, post: &SharedPost) -> bool {
        let now_favorite = self.favorites.toggle(post);
        debug!(key = post.key(), favorite = now_favorite, "favorite toggled");
        now_favorite
    }

    /// Hydrate favorites that lack snapshots and queue their previews.
    pub async fn hydrate_favorites(&self) {
        let hydrated = self
            .favorites
            .hydrate_missing(self.backend.as_ref(), self.credentials.as_ref())
            .await;
        self.scheduler.request_many(&hydrated, TIER_NORMAL);
    }

    pub fn set_visible_filter(&self, filter: VisibleFilter, sort: ResultSort) {
        let mut state = self.state.lock();
        state.visible_filter = filter;
        state.sort = sort;
    }

    /// The visible sequence: master list filtered and ordered.
    pub fn visible_posts(&self) -> Vec<SharedPost> {
        let state = self.state.lock();
        let mut visible: Vec<SharedPost> = state
            .posts
            .iter()
            .filter(|post| state.visible_filter.matches(post))
            .cloned()
            .collect();
        let sort = state.sort;
        drop(state);
        order_posts(&mut visible, sort);
        visible
    }

    pub fn posts(&self) -> Vec<SharedPost> {
        self.state.lock().posts.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    pub fn status(&self) -> String {
        self.state.lock().status.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn has_more(&self) -> bool {
        self.state.lock().has_more
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_loading(&self, generation: u64, loading: bool) {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            return;
        }
        state.loading = loading;
        drop(state);
        self.emit(UiEvent::Loading(loading));
    }

    fn set_status(&self, generation: u64, status: String) {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            return;
        }
        state.status = status.clone();
        drop(state);
        self.emit(UiEvent::Status(status));
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.events.send(event);
    }
}

fn loaded_status(state: &SessionState) -> String {
    let shown = state
        .posts
        .iter()
        .filter(|post| state.visible_filter.matches(post))
        .count();
    format!("Loaded {} posts ({} shown)", state.posts.len(), shown)
}
