//! Favorite tracking keyed by composite post key.
//!
//! The store holds the favorite key set plus a snapshot post per key so
//! favorites stay browsable after the search results that produced them
//! are gone. Keys survive restarts through the settings collaborator;
//! snapshots missing a post (favorited in an earlier run) are re-hydrated
//! from the backend with bounded concurrency.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::booru::api::SearchBackend;
use crate::booru::post::{SharedPost, parse_composite_key};
use crate::booru::site::CredentialsProvider;

/// How many favorite hydration lookups run at once.
const HYDRATION_CONCURRENCY: usize = 4;

#[derive(Default)]
pub struct FavoriteStore {
    /// Lowercased composite keys of every favorite.
    keys: DashSet<String>,
    /// Latest known post per favorite key.
    snapshots: DashMap<String, SharedPost>,
}

impl FavoriteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the key set persisted by the settings collaborator.
    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        let store = Self::default();
        for key in keys {
            let key = key.trim().to_lowercase();
            if !key.is_empty() {
                store.keys.insert(key);
            }
        }
        store
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key set for persistence.
    pub fn export_keys(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.clone()).collect()
    }

    /// Snapshot posts, for the favorites view.
    pub fn snapshots(&self) -> Vec<SharedPost> {
        self.snapshots.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Flip a post's favorite state; returns the new state.
    pub fn toggle(&self, post: &SharedPost) -> bool {
        let key = post.key().to_lowercase();
        if self.keys.remove(&key).is_some() {
            self.snapshots.remove(&key);
            post.set_favorite(false);
            false
        } else {
            self.keys.insert(key.clone());
            post.set_favorite(true);
            self.snapshots.insert(key, post.clone());
            true
        }
    }

    /// Stamp a freshly loaded post with its favorite state, refreshing
    /// the snapshot when it is one.
    pub fn mark_if_favorite(&self, post: &SharedPost) {
        let key = post.key().to_lowercase();
        if self.keys.contains(&key) {
            post.set_favorite(true);
            self.snapshots.insert(key, post.clone());
        }
    }

    /// Resolve favorites that have a key but no snapshot yet. Lookups run
    /// through the backend with a small concurrency cap; keys that fail
    /// to parse or resolve are left for a later attempt.
    pub async fn hydrate_missing(
        &self,
        backend: &dyn SearchBackend,
        credentials: &dyn CredentialsProvider,
    ) -> Vec<SharedPost> {
        let missing: Vec<String> = self
            .keys
            .iter()
            .filter(|key| !self.snapshots.contains_key(key.as_str()))
            .map(|key| key.clone())
            .collect();

        if missing.is_empty() {
            return Vec::new();
        }
        debug!(count = missing.len(), "hydrating favorites without snapshots");

        let gate = Arc::new(Semaphore::new(HYDRATION_CONCURRENCY));
        let lookups = missing.into_iter().filter_map(|key| {
            let (site, id) = parse_composite_key(&key)?;
            let creds = credentials.credentials_for(site);
            let gate = gate.clone();
            Some(async move {
                let _permit = gate.acquire().await.ok()?;
                backend.lookup_post(site, &id, creds.as_ref()).await
            })
        });

        let mut hydrated = Vec::new();
        for post in join_all(lookups).await.into_iter().flatten() {
            post.set_favorite(true);
            self.snapshots.insert(post.key().to_lowercase(), post.clone());
            hydrated.push(post);
        }

        if !hydrated.is_empty() {
            info!(count = hydrated.len(), "hydrated favorite snapshots");
        }
        hydrated
    }
}
