//! Cache manager
//!
//! Turns the two ranked prediction lists into admission and eviction
//! decisions under the configured byte budget, and drives the download
//! pipeline. Also runs the periodic age-based cache cleaning.

pub mod fetch;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::model::{now_ms, ContentItem, PredictionScore};

pub use fetch::{cache_rel_path, FetchTransport, HttpFetcher};

/// Cache policy knobs, copied out of the configuration at wiring time.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub capacity_bytes: u64,
    /// Prediction cycles an item may be absent from both ranked lists
    /// before eviction.
    pub grace_cycles: u32,
    /// Age threshold for retention eviction, in milliseconds.
    pub retention_ms: i64,
}

/// Mutable state shared between fusion cycles, fetch completions, and the
/// opportunistic proxy path. Guarded by one mutex; never held across await.
#[derive(Debug, Default)]
struct SharedState {
    /// Content ids with a fetch currently in flight, each mapped to the
    /// bytes reserved against the budget for it. Consulted by admission,
    /// the proxy path, and eviction, so an identifier is never fetched
    /// twice concurrently, reserved bytes count against later admission,
    /// and a completing fetch wins over a same-cycle eviction decision.
    in_flight: HashMap<i64, u64>,
    /// Consecutive cycles each known id has been missing from both lists.
    absent_cycles: HashMap<i64, u32>,
}

impl SharedState {
    fn reserved_bytes(&self) -> u64 {
        self.in_flight.values().sum()
    }
}

pub struct CacheManager {
    catalog: Arc<dyn Catalog>,
    fetcher: Arc<dyn FetchTransport>,
    cache_root: PathBuf,
    policy: CachePolicy,
    fetch_slots: Arc<Semaphore>,
    state: Arc<Mutex<SharedState>>,
}

impl CacheManager {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        fetcher: Arc<dyn FetchTransport>,
        cache_root: PathBuf,
        policy: CachePolicy,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            cache_root,
            policy,
            fetch_slots: Arc::new(Semaphore::new(max_concurrent_fetches)),
            state: Arc::new(Mutex::new(SharedState::default())),
        }
    }

    /// Merge the two ranked lists into one admission order: round-robin
    /// from the head of each list, first occurrence wins, identifiers
    /// already cached are skipped. Either list may be empty. Deterministic
    /// for identical inputs.
    pub fn fuse(
        engagement: &[PredictionScore],
        locality: &[PredictionScore],
        already_cached: &HashSet<i64>,
    ) -> Vec<i64> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let max_len = engagement.len().max(locality.len());

        for rank in 0..max_len {
            for list in [engagement, locality] {
                if let Some(score) = list.get(rank) {
                    let id = score.content_id;
                    if !already_cached.contains(&id) && seen.insert(id) {
                        order.push(id);
                    }
                }
            }
        }
        order
    }

    /// One fusion cycle: admit merged candidates under the budget and
    /// evict identifiers that have dropped out of both lists for longer
    /// than the grace period. Decisions are computed from one snapshot of
    /// the catalog; a later cycle supersedes this one.
    pub async fn update_cache(
        &self,
        engagement: Vec<PredictionScore>,
        locality: Vec<PredictionScore>,
    ) {
        let already_cached: HashSet<i64> = match self.catalog.downloaded_ids() {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, skipping fusion cycle");
                return;
            }
        };
        // Bytes reserved by fetches still in flight count against the
        // budget; otherwise overlapping cycles each admit up to the full
        // capacity.
        let mut used = match self.catalog.total_cached_size() {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, skipping fusion cycle");
                return;
            }
        };
        used += self
            .state
            .lock()
            .expect("cache state lock poisoned")
            .reserved_bytes();

        let order = Self::fuse(&engagement, &locality, &already_cached);
        info!(
            candidates = order.len(),
            used_bytes = used,
            budget_bytes = self.policy.capacity_bytes,
            "Fusion cycle"
        );

        for content_id in &order {
            let item = match self.catalog.find_by_id(*content_id) {
                Ok(Some(item)) => item,
                Ok(None) => {
                    debug!(content_id, "No catalog metadata yet, skipping candidate");
                    continue;
                }
                Err(e) => {
                    warn!(content_id, error = %e, "Catalog lookup failed, skipping candidate");
                    continue;
                }
            };
            if item.downloaded {
                continue;
            }
            if used + item.size > self.policy.capacity_bytes {
                debug!(content_id, size = item.size, "Over budget, not admitted");
                continue;
            }
            if self.request_fetch(item.clone()) {
                used += item.size;
            }
        }

        self.track_absences(&engagement, &locality).await;
    }

    /// Enqueue a fetch for the item unless one is already in flight.
    /// Returns whether a new job was spawned. Fire-and-forget: callers
    /// (including the proxy path) never wait on the download.
    pub fn request_fetch(&self, item: ContentItem) -> bool {
        {
            let mut state = self.state.lock().expect("cache state lock poisoned");
            if state.in_flight.contains_key(&item.content_id) {
                debug!(content_id = item.content_id, "Fetch already in flight");
                return false;
            }
            state.in_flight.insert(item.content_id, item.size);
        }

        let catalog = self.catalog.clone();
        let fetcher = self.fetcher.clone();
        let state = self.state.clone();
        let slots = self.fetch_slots.clone();
        let dest = self
            .cache_root
            .join(item.path.trim_start_matches('/'));

        tokio::spawn(async move {
            // Closed semaphore only happens at shutdown; abandon quietly.
            let Ok(_permit) = slots.acquire_owned().await else {
                state.lock().expect("cache state lock poisoned")
                    .in_flight.remove(&item.content_id);
                return;
            };

            match fetcher.fetch(&item.origin_url, &dest).await {
                Ok(written) => {
                    let result = catalog
                        .upsert(&ContentItem { downloaded: false, ..item.clone() })
                        .and_then(|_| {
                            catalog.mark_downloaded(item.content_id, now_ms(), written)
                        });
                    match result {
                        Ok(()) => {
                            info!(content_id = item.content_id, bytes = written, "Content cached")
                        }
                        Err(e) => {
                            // Catalog failed after the file landed: remove the
                            // file so cache state and disk stay consistent.
                            warn!(content_id = item.content_id, error = %e,
                                  "Catalog update failed after fetch");
                            std::fs::remove_file(&dest).ok();
                        }
                    }
                }
                Err(e) => {
                    warn!(content_id = item.content_id, error = %e,
                          "Fetch failed, will retry on a later cycle");
                }
            }

            state
                .lock()
                .expect("cache state lock poisoned")
                .in_flight
                .remove(&item.content_id);
        });
        true
    }

    /// Bump absence counters and evict identifiers past the grace period.
    async fn track_absences(&self, engagement: &[PredictionScore], locality: &[PredictionScore]) {
        let known = match self.catalog.all_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, skipping absence tracking");
                return;
            }
        };
        let seen: HashSet<i64> = engagement
            .iter()
            .chain(locality)
            .map(|s| s.content_id)
            .collect();

        let expired: Vec<i64> = {
            let mut state = self.state.lock().expect("cache state lock poisoned");
            let known_set: HashSet<i64> = known.iter().copied().collect();
            state.absent_cycles.retain(|id, _| known_set.contains(id));

            let mut expired = Vec::new();
            for id in known {
                if seen.contains(&id) {
                    state.absent_cycles.remove(&id);
                } else {
                    let missed = state.absent_cycles.entry(id).or_insert(0);
                    *missed += 1;
                    if *missed > self.policy.grace_cycles && !state.in_flight.contains_key(&id) {
                        expired.push(id);
                    }
                }
            }
            expired
        };

        for content_id in expired {
            match self.catalog.find_by_id(content_id) {
                Ok(Some(item)) => {
                    info!(content_id, "Evicting: absent from predictions past grace period");
                    self.evict(&item);
                }
                Ok(None) => {}
                Err(e) => warn!(content_id, error = %e, "Eviction lookup failed"),
            }
        }
    }

    /// Periodic cleaning pass: retention eviction plus cache-hit stats.
    pub async fn clean_cache(&self) {
        let cutoff = now_ms() - self.policy.retention_ms;
        let stale = match self.catalog.find_stale(cutoff) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, skipping cleaning cycle");
                return;
            }
        };

        info!(stale = stale.len(), "Cache cleaning cycle");
        for item in stale {
            let fetching = {
                let state = self.state.lock().expect("cache state lock poisoned");
                state.in_flight.contains_key(&item.content_id)
            };
            if fetching {
                continue;
            }
            info!(content_id = item.content_id, "Evicting: past retention threshold");
            self.evict(&item);
        }

        self.reconcile_budget();
        self.log_cache_stats();
    }

    /// Evict oldest-first until the cached total fits the budget again.
    /// Opportunistic proxy-path prefetches carry no size up front, so a
    /// burst of them can land over budget; this pass restores the
    /// invariant.
    fn reconcile_budget(&self) {
        let mut total = match self.catalog.total_cached_size() {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, skipping budget reconciliation");
                return;
            }
        };
        if total <= self.policy.capacity_bytes {
            return;
        }

        let mut items = match self.catalog.find_stale(i64::MAX) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, skipping budget reconciliation");
                return;
            }
        };
        items.sort_by_key(|item| item.cache_time);

        for item in items {
            if total <= self.policy.capacity_bytes {
                break;
            }
            if self.is_fetching(item.content_id) {
                continue;
            }
            info!(
                content_id = item.content_id,
                size = item.size,
                "Evicting: cache over budget"
            );
            self.evict(&item);
            total = total.saturating_sub(item.size);
        }
    }

    /// Remove the stored file, then the catalog entry and its access log.
    fn evict(&self, item: &ContentItem) {
        let path = self.cache_root.join(item.path.trim_start_matches('/'));
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(content_id = item.content_id, error = %e, "Failed to delete cached file");
            }
        }
        if let Err(e) = self.catalog.delete(item.content_id) {
            warn!(content_id = item.content_id, error = %e, "Failed to delete catalog entry");
        }

        let mut state = self.state.lock().expect("cache state lock poisoned");
        state.absent_cycles.remove(&item.content_id);
    }

    fn log_cache_stats(&self) {
        let rows = match self.catalog.all_with_accesses() {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, skipping cache stats");
                return;
            }
        };
        let now = now_ms();
        for (item, accesses) in rows {
            info!(
                content_id = item.content_id,
                hits = accesses.len(),
                age_ms = now - item.cache_time,
                "Cache hits"
            );
        }
    }

    /// Whether a fetch is currently in flight for the identifier.
    pub fn is_fetching(&self, content_id: i64) -> bool {
        self.state
            .lock()
            .expect("cache state lock poisoned")
            .in_flight
            .contains_key(&content_id)
    }
}
