//! Priority-aware preview loading.
//!
//! A fixed pool of long-lived workers drains one shared priority queue
//! keyed by (tier, sequence): lower tier first, FIFO within a tier. The
//! queue uses lazy invalidation: re-prioritizing a post pushes a second
//! heap entry and records the new best tier in a side map; workers discard
//! any dequeued entry that no longer matches the recorded tier. A shared
//! in-flight set, checked and inserted under the same lock as every queue
//! decision, guarantees at most one outstanding fetch per post. Posts
//! scrolled into view skip the queue entirely through a small separately
//! gated expedite path.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, trace};

use crate::booru::fetch::MediaFetchClient;
use crate::booru::post::{PreviewImage, SharedPost};
use crate::booru::search::UiEvent;
use crate::booru::site::BooruSite;

/// Priority tier for posts currently on screen.
pub const TIER_VISIBLE: u8 = 0;
/// Priority tier for background backlog loads.
pub const TIER_NORMAL: u8 = 1;

/// Byte source for preview fetches. Production uses [`MediaFetchClient`];
/// tests substitute instrumented stubs.
#[async_trait]
pub trait PreviewFetcher: Send + Sync {
    async fn fetch_preview(&self, url: &str, site: BooruSite) -> Option<PreviewImage>;
}

#[async_trait]
impl PreviewFetcher for MediaFetchClient {
    async fn fetch_preview(&self, url: &str, site: BooruSite) -> Option<PreviewImage> {
        self.fetch(url, Some(site)).await.map(PreviewImage::new)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Background worker count.
    pub worker_count: usize,
    /// Simultaneous expedited fetches for visible posts.
    pub visible_gate_permits: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 6,
            visible_gate_permits: 3,
        }
    }
}

/// One queued load. Orders by (tier, sequence), inverted so the std
/// max-heap pops the numerically smallest pair first.
struct QueueEntry {
    tier: u8,
    seq: u64,
    post: SharedPost,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.tier, self.seq) == (other.tier, other.seq)
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.tier, other.seq).cmp(&(self.tier, self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    /// Best-known tier per queued post key; the authority stale heap
    /// entries are checked against.
    queued_tier: HashMap<String, u8>,
    /// Posts with an outstanding fetch, queue-pool or expedited.
    in_flight: HashSet<String>,
    next_seq: u64,
}

struct SchedulerInner {
    fetcher: Arc<dyn PreviewFetcher>,
    state: Mutex<QueueState>,
    /// One permit per enqueue; workers never busy-poll an empty queue.
    work_signal: Semaphore,
    visible_gate: Arc<Semaphore>,
    events: mpsc::UnboundedSender<UiEvent>,
    shutdown: watch::Sender<bool>,
}

/// Long-lived scheduler, independent of search sessions: previews for
/// favorited or already-listed posts keep completing across searches.
pub struct PreviewScheduler {
    inner: Arc<SchedulerInner>,
}

impl PreviewScheduler {
    pub fn new(
        fetcher: Arc<dyn PreviewFetcher>,
        config: SchedulerConfig,
        events: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(SchedulerInner {
            fetcher,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                queued_tier: HashMap::new(),
                in_flight: HashSet::new(),
                next_seq: 0,
            }),
            work_signal: Semaphore::new(0),
            visible_gate: Arc::new(Semaphore::new(config.visible_gate_permits.max(1))),
            events,
            shutdown: shutdown_tx,
        });

        for worker_id in 0..config.worker_count {
            tokio::spawn(worker_loop(inner.clone(), shutdown_rx.clone(), worker_id));
        }

        Self { inner }
    }

    /// Queue a preview load. Idempotent and cheap: a post already loading
    /// or already queued at an equal-or-better tier is a no-op; a strictly
    /// better tier upgrades its position via a fresh heap entry.
    pub fn request(&self, post: &SharedPost, tier: u8) {
        if post.is_preview_loaded() || post.preview_url().trim().is_empty() {
            return;
        }

        {
            let mut state = self.inner.state.lock();
            if state.in_flight.contains(post.key()) {
                return;
            }
            if let Some(&current) = state.queued_tier.get(post.key()) {
                if tier >= current {
                    return;
                }
            }

            state.queued_tier.insert(post.key().to_string(), tier);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueueEntry {
                tier,
                seq,
                post: post.clone(),
            });
        }

        self.inner.work_signal.add_permits(1);
    }

    pub fn request_many(&self, posts: &[SharedPost], tier: u8) {
        for post in posts {
            self.request(post, tier);
        }
    }

    /// Load a visible post ahead of everything, bypassing the shared
    /// queue. The expedited task still registers in the in-flight set, so
    /// the at-most-once guarantee holds across both paths.
    pub fn expedite(&self, post: &SharedPost) {
        if post.is_preview_loaded() || post.preview_url().trim().is_empty() {
            return;
        }

        {
            let mut state = self.inner.state.lock();
            if state.in_flight.contains(post.key()) {
                return;
            }
            state.in_flight.insert(post.key().to_string());
            state.queued_tier.remove(post.key());
        }

        let inner = self.inner.clone();
        let post = post.clone();
        tokio::spawn(async move {
            let gate = inner.visible_gate.clone();
            match gate.acquire().await {
                Ok(_permit) => {
                    fetch_and_attach(&inner, &post).await;
                }
                Err(_) => {}
            }
            inner.state.lock().in_flight.remove(post.key());
        });
    }

    /// Entries waiting in the queue, stale ones included.
    pub fn queue_depth(&self) -> usize {
        self.inner.state.lock().heap.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Stop the worker pool. In-flight fetches finish; queued work is
    /// abandoned.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        self.inner.work_signal.close();
    }
}

/// Pop queue entries until one is still authoritative, claiming it into
/// the in-flight set. Stale entries (superseded tier, already loading,
/// already loaded, withdrawn) are dropped on the floor.
fn claim_next(inner: &SchedulerInner) -> Option<SharedPost> {
    let mut state = inner.state.lock();
    while let Some(entry) = state.heap.pop() {
        let key = entry.post.key().to_string();

        if entry.post.is_preview_loaded() || entry.post.preview_url().trim().is_empty() {
            state.queued_tier.remove(&key);
            continue;
        }
        if state.in_flight.contains(&key) {
            continue;
        }
        let Some(&expected_tier) = state.queued_tier.get(&key) else {
            continue;
        };
        if entry.tier > expected_tier {
            // Stale entry left behind by a priority upgrade.
            continue;
        }

        state.queued_tier.remove(&key);
        state.in_flight.insert(key);
        return Some(entry.post.clone());
    }
    None
}

async fn fetch_and_attach(inner: &SchedulerInner, post: &SharedPost) -> bool {
    let url = post.preview_url();
    match inner.fetcher.fetch_preview(&url, post.site()).await {
        Some(image) => {
            post.attach_preview(image);
            let _ = inner.events.send(UiEvent::PreviewLoaded(post.clone()));
            true
        }
        None => {
            // Silent by design at the user level; the post stays eligible
            // for a future visibility-driven retry.
            trace!(key = post.key(), "preview fetch failed");
            false
        }
    }
}

async fn worker_loop(
    inner: Arc<SchedulerInner>,
    mut shutdown: watch::Receiver<bool>,
    worker_id: usize,
) {
    debug!(worker_id, "preview worker started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            permit = inner.work_signal.acquire() => {
                let Ok(permit) = permit else { break };
                permit.forget();

                let Some(target) = claim_next(&inner) else {
                    continue;
                };

                fetch_and_attach(&inner, &target).await;
                inner.state.lock().in_flight.remove(target.key());
            }
        }
    }
    debug!(worker_id, "preview worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booru::post::{Post, PostDetails};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sample(id: &str) -> SharedPost {
        Post::new(
            BooruSite::Safebooru,
            id,
            PostDetails {
                preview_url: format!("https://safebooru.org/thumbnails/{id}.jpg"),
                full_url: format!("https://safebooru.org/images/{id}.jpg"),
                ..PostDetails::default()
            },
        )
    }

    /// Fetcher that records per-key concurrency and call counts.
    struct CountingFetcher {
        delay: Duration,
        succeed: bool,
        calls: Mutex<HashMap<String, usize>>,
        live: AtomicUsize,
        max_live: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(delay: Duration, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                delay,
                succeed,
                calls: Mutex::new(HashMap::new()),
                live: AtomicUsize::new(0),
                max_live: AtomicUsize::new(0),
            })
        }

        fn calls_for(&self, url_fragment: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|(url, _)| url.contains(url_fragment))
                .map(|(_, count)| *count)
                .sum()
        }
    }

    #[async_trait]
    impl PreviewFetcher for CountingFetcher {
        async fn fetch_preview(&self, url: &str, _site: BooruSite) -> Option<PreviewImage> {
            *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(live, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.live.fetch_sub(1, Ordering::SeqCst);
            self.succeed.then(|| PreviewImage::new(vec![1, 2, 3]))
        }
    }

    fn scheduler_with(
        fetcher: Arc<dyn PreviewFetcher>,
        workers: usize,
    ) -> (PreviewScheduler, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PreviewScheduler::new(
            fetcher,
            SchedulerConfig {
                worker_count: workers,
                visible_gate_permits: 3,
            },
            tx,
        );
        (scheduler, rx)
    }

    #[tokio::test]
    async fn visible_tier_dequeues_before_earlier_normal_tier() {
        let fetcher = CountingFetcher::new(Duration::ZERO, true);
        let (scheduler, _rx) = scheduler_with(fetcher, 0);

        let b = sample("b");
        let a = sample("a");
        scheduler.request(&b, TIER_NORMAL);
        scheduler.request(&a, TIER_VISIBLE);

        let first = claim_next(&scheduler.inner).expect("first claim");
        assert_eq!(first.id(), "a");
        let second = claim_next(&scheduler.inner).expect("second claim");
        assert_eq!(second.id(), "b");
    }

    #[tokio::test]
    async fn fifo_within_a_tier() {
        let fetcher = CountingFetcher::new(Duration::ZERO, true);
        let (scheduler, _rx) = scheduler_with(fetcher, 0);

        for id in ["1", "2", "3"] {
            scheduler.request(&sample(id), TIER_NORMAL);
        }

        for id in ["1", "2", "3"] {
            assert_eq!(claim_next(&scheduler.inner).expect("claim").id(), id);
        }
    }

    #[tokio::test]
    async fn equal_or_worse_tier_requeue_is_a_noop() {
        let fetcher = CountingFetcher::new(Duration::ZERO, true);
        let (scheduler, _rx) = scheduler_with(fetcher, 0);

        let post = sample("1");
        scheduler.request(&post, TIER_NORMAL);
        scheduler.request(&post, TIER_NORMAL);
        assert_eq!(scheduler.queue_depth(), 1);

        // Downgrade attempt is also a no-op.
        scheduler.request(&post, TIER_NORMAL + 1);
        assert_eq!(scheduler.queue_depth(), 1);
    }

    #[tokio::test]
    async fn tier_upgrade_supersedes_the_stale_entry() {
        let fetcher = CountingFetcher::new(Duration::ZERO, true);
        let (scheduler, _rx) = scheduler_with(fetcher, 0);

        let post = sample("1");
        let other = sample("2");
        scheduler.request(&other, TIER_NORMAL);
        scheduler.request(&post, TIER_NORMAL);
        scheduler.request(&post, TIER_VISIBLE);
        // Two live entries plus one stale for the upgraded post.
        assert_eq!(scheduler.queue_depth(), 3);

        // Upgraded entry comes out first, stale duplicate is discarded.
        assert_eq!(claim_next(&scheduler.inner).expect("claim").id(), "1");
        assert_eq!(claim_next(&scheduler.inner).expect("claim").id(), "2");
        assert!(claim_next(&scheduler.inner).is_none());
    }

    #[tokio::test]
    async fn requeue_while_in_flight_is_a_noop() {
        let fetcher = CountingFetcher::new(Duration::ZERO, true);
        let (scheduler, _rx) = scheduler_with(fetcher, 0);

        let post = sample("1");
        scheduler.request(&post, TIER_NORMAL);
        let claimed = claim_next(&scheduler.inner).expect("claim");
        assert_eq!(claimed.id(), "1");
        assert_eq!(scheduler.in_flight_count(), 1);

        // Any further request for the loading post must not queue again.
        scheduler.request(&post, TIER_VISIBLE);
        assert_eq!(scheduler.queue_depth(), 0);
        assert!(claim_next(&scheduler.inner).is_none());
    }

    #[tokio::test]
    async fn at_most_one_outstanding_fetch_per_post() {
        let fetcher = CountingFetcher::new(Duration::from_millis(30), true);
        let (scheduler, _rx) = scheduler_with(fetcher.clone(), 4);

        let post = sample("1");
        for _ in 0..8 {
            scheduler.request(&post, TIER_NORMAL);
            scheduler.expedite(&post);
        }

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(post.is_preview_loaded());
        assert_eq!(fetcher.calls_for("/1.jpg"), 1);
        assert!(fetcher.max_live.load(Ordering::SeqCst) <= 1);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn workers_drain_the_queue_and_emit_events() {
        let fetcher = CountingFetcher::new(Duration::from_millis(1), true);
        let (scheduler, mut rx) = scheduler_with(fetcher, 3);

        let posts: Vec<SharedPost> = (0..6).map(|i| sample(&i.to_string())).collect();
        scheduler.request_many(&posts, TIER_NORMAL);

        let mut loaded = 0;
        while loaded < 6 {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(UiEvent::PreviewLoaded(_))) => loaded += 1,
                Ok(Some(_)) => {}
                _ => panic!("preview events did not arrive"),
            }
        }

        assert!(posts.iter().all(|p| p.is_preview_loaded()));
        assert_eq!(scheduler.in_flight_count(), 0);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn failed_fetch_is_silent_and_post_stays_retryable() {
        let fetcher = CountingFetcher::new(Duration::ZERO, false);
        let (scheduler, _rx) = scheduler_with(fetcher.clone(), 1);

        let post = sample("1");
        scheduler.request(&post, TIER_NORMAL);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!post.is_preview_loaded());
        assert_eq!(scheduler.in_flight_count(), 0);
        assert_eq!(fetcher.calls_for("/1.jpg"), 1);

        // No automatic retry: a fresh explicit request is required.
        scheduler.request(&post, TIER_NORMAL);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.calls_for("/1.jpg"), 2);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn expedite_completes_without_any_workers() {
        let fetcher = CountingFetcher::new(Duration::ZERO, true);
        let (scheduler, mut rx) = scheduler_with(fetcher, 0);

        let post = sample("1");
        scheduler.expedite(&post);

        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(UiEvent::PreviewLoaded(loaded))) => assert_eq!(loaded.key(), post.key()),
            _ => panic!("expedited preview did not load"),
        }
        assert!(post.is_preview_loaded());
    }

    #[tokio::test]
    async fn already_loaded_posts_are_never_requeued() {
        let fetcher = CountingFetcher::new(Duration::ZERO, true);
        let (scheduler, _rx) = scheduler_with(fetcher, 0);

        let post = sample("1");
        post.attach_preview(PreviewImage::new(vec![9]));
        scheduler.request(&post, TIER_VISIBLE);
        scheduler.expedite(&post);
        assert_eq!(scheduler.queue_depth(), 0);
        assert_eq!(scheduler.in_flight_count(), 0);
    }
}
