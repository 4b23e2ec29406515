//! Cache manager integration tests
//!
//! Exercises full fusion cycles against a real SQLite catalog and an
//! in-process fake fetch transport:
//! - budget invariant: the sum of cached sizes never exceeds capacity
//! - fetch dedup: repeated admission never double-fetches
//! - grace-cycle eviction and retention cleaning
//! - a completing fetch wins over a same-cycle eviction decision

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use edgecache_node::cache::{CacheManager, CachePolicy, FetchTransport};
use edgecache_node::catalog::{Catalog, SqliteCatalog};
use edgecache_node::error::TransportError;
use edgecache_node::model::{now_ms, ContentItem, PredictionScore, ScoreSource};

/// Fetch transport that writes a configured number of bytes per URL.
struct FakeFetcher {
    sizes: Mutex<HashMap<String, u64>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl FakeFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            sizes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    fn serve(&self, url: &str, size: u64) {
        self.sizes.lock().unwrap().insert(url.to_string(), size);
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchTransport for FakeFetcher {
    async fn fetch(&self, origin_url: &str, dest: &Path) -> Result<u64, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let size = *self
            .sizes
            .lock()
            .unwrap()
            .get(origin_url)
            .ok_or_else(|| TransportError::Status(404))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TransportError::Io(e.to_string()))?;
        }
        std::fs::write(dest, vec![0u8; size as usize])
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(size)
    }
}

fn item(id: i64, path: &str, size: u64) -> ContentItem {
    ContentItem {
        content_id: id,
        origin_url: format!("http://origin.example{path}"),
        path: path.to_string(),
        size,
        publish_time: 0,
        cache_time: 0,
        downloaded: false,
    }
}

fn manager(
    catalog: Arc<SqliteCatalog>,
    fetcher: Arc<FakeFetcher>,
    root: &Path,
    capacity: u64,
    grace: u32,
) -> CacheManager {
    CacheManager::new(
        catalog,
        fetcher,
        root.to_path_buf(),
        CachePolicy {
            capacity_bytes: capacity,
            grace_cycles: grace,
            retention_ms: 7 * 24 * 3_600_000,
        },
        4,
    )
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout");
}

fn ranked(ids: &[i64]) -> Vec<PredictionScore> {
    ids.iter()
        .enumerate()
        .map(|(rank, id)| PredictionScore {
            content_id: *id,
            source: ScoreSource::Engagement,
            value: 1.0 - rank as f64 * 0.1,
            latest_signal: 0,
        })
        .collect()
}

// =============================================================================
// Budget invariant
// =============================================================================

#[tokio::test]
async fn admission_respects_the_byte_budget() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::ZERO));

    // 60 + 50 would blow the budget of 100; 60 + 30 fits.
    for (id, path, size) in [(1, "/a/1.mp4", 60), (2, "/a/2.mp4", 50), (3, "/a/3.mp4", 30)] {
        let content = item(id, path, size);
        fetcher.serve(&content.origin_url, size);
        catalog.upsert(&content).unwrap();
    }

    let cache = manager(catalog.clone(), fetcher.clone(), dir.path(), 100, 4);
    cache.update_cache(ranked(&[1, 2, 3]), Vec::new()).await;

    wait_until(|| catalog.downloaded_ids().unwrap().len() == 2).await;
    assert_eq!(catalog.downloaded_ids().unwrap(), vec![1, 3]);
    assert!(catalog.total_cached_size().unwrap() <= 100);
    assert!(dir.path().join("a/1.mp4").exists());
    assert!(!dir.path().join("a/2.mp4").exists());
}

#[tokio::test]
async fn overlapping_cycles_share_the_budget() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(100)));

    // Either item alone fits the budget of 100; both together do not.
    for (id, path) in [(1, "/g/1.mp4"), (2, "/g/2.mp4")] {
        let content = item(id, path, 60);
        fetcher.serve(&content.origin_url, 60);
        catalog.upsert(&content).unwrap();
    }

    let cache = manager(catalog.clone(), fetcher.clone(), dir.path(), 100, 4);

    // Cycle 1 admits item 1; its 60 bytes are reserved while in flight.
    cache.update_cache(ranked(&[1]), Vec::new()).await;
    // Cycle 2 runs before the fetch completes and must not admit item 2.
    cache.update_cache(ranked(&[1, 2]), Vec::new()).await;

    wait_until(|| catalog.downloaded_ids().unwrap().len() == 1).await;
    assert_eq!(catalog.downloaded_ids().unwrap(), vec![1]);
    assert_eq!(fetcher.call_count(), 1);
    assert!(catalog.total_cached_size().unwrap() <= 100);

    // With item 1 fully cached the budget is genuinely spent.
    cache.update_cache(ranked(&[2]), Vec::new()).await;
    assert_eq!(fetcher.call_count(), 1);
}

// =============================================================================
// Fetch dedup
// =============================================================================

#[tokio::test]
async fn duplicate_admission_never_double_fetches() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(100)));

    let content = item(1, "/b/1.mp4", 10);
    fetcher.serve(&content.origin_url, 10);
    catalog.upsert(&content).unwrap();

    let cache = manager(catalog.clone(), fetcher.clone(), dir.path(), 1_000, 4);

    // Two consecutive cycles admit the same id while the first fetch is
    // still in flight.
    cache.update_cache(ranked(&[1]), Vec::new()).await;
    cache.update_cache(ranked(&[1]), Vec::new()).await;
    assert!(!cache.request_fetch(item(1, "/b/1.mp4", 10)));

    wait_until(|| catalog.downloaded_ids().unwrap().len() == 1).await;
    assert_eq!(fetcher.call_count(), 1);
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn absent_items_are_evicted_after_the_grace_period() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::ZERO));

    let content = item(1, "/c/1.mp4", 10);
    fetcher.serve(&content.origin_url, 10);
    catalog.upsert(&content).unwrap();

    let cache = manager(catalog.clone(), fetcher.clone(), dir.path(), 1_000, 1);
    cache.update_cache(ranked(&[1]), Vec::new()).await;
    wait_until(|| catalog.downloaded_ids().unwrap().len() == 1).await;
    assert!(dir.path().join("c/1.mp4").exists());

    // One missed cycle is within the grace period.
    cache.update_cache(Vec::new(), Vec::new()).await;
    assert!(catalog.find_by_id(1).unwrap().is_some());

    // The second consecutive miss is past it.
    cache.update_cache(Vec::new(), Vec::new()).await;
    assert!(catalog.find_by_id(1).unwrap().is_none());
    assert!(!dir.path().join("c/1.mp4").exists());
}

#[tokio::test]
async fn reappearing_in_a_list_resets_the_absence_counter() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::ZERO));

    let content = item(1, "/d/1.mp4", 10);
    fetcher.serve(&content.origin_url, 10);
    catalog.upsert(&content).unwrap();

    let cache = manager(catalog.clone(), fetcher.clone(), dir.path(), 1_000, 1);
    cache.update_cache(ranked(&[1]), Vec::new()).await;
    wait_until(|| catalog.downloaded_ids().unwrap().len() == 1).await;

    cache.update_cache(Vec::new(), Vec::new()).await;
    // Shows up in the locality list this cycle, counter resets.
    cache.update_cache(Vec::new(), ranked(&[1])).await;
    cache.update_cache(Vec::new(), Vec::new()).await;
    assert!(catalog.find_by_id(1).unwrap().is_some());

    cache.update_cache(Vec::new(), Vec::new()).await;
    assert!(catalog.find_by_id(1).unwrap().is_none());
}

#[tokio::test]
async fn a_completing_fetch_wins_over_a_same_cycle_eviction() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::from_millis(100)));

    let content = item(1, "/e/1.mp4", 10);
    fetcher.serve(&content.origin_url, 10);
    catalog.upsert(&content).unwrap();

    // Zero grace: a single missed cycle would normally evict.
    let cache = manager(catalog.clone(), fetcher.clone(), dir.path(), 1_000, 0);
    assert!(cache.request_fetch(content));

    // Eviction decided while the fetch is in flight must be skipped.
    cache.update_cache(Vec::new(), Vec::new()).await;
    assert!(catalog.find_by_id(1).unwrap().is_some());

    wait_until(|| catalog.downloaded_ids().unwrap().len() == 1).await;
    assert!(dir.path().join("e/1.mp4").exists());
}

// =============================================================================
// Retention cleaning
// =============================================================================

#[tokio::test]
async fn cleaning_evicts_items_past_the_retention_threshold() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::ZERO));

    let cache = CacheManager::new(
        catalog.clone(),
        fetcher,
        dir.path().to_path_buf(),
        CachePolicy {
            capacity_bytes: 1_000,
            grace_cycles: 4,
            retention_ms: 60_000,
        },
        4,
    );

    let old = item(1, "/f/old.mp4", 10);
    let fresh = item(2, "/f/fresh.mp4", 10);
    catalog.upsert(&old).unwrap();
    catalog.upsert(&fresh).unwrap();
    catalog.mark_downloaded(1, now_ms() - 120_000, 10).unwrap();
    catalog.mark_downloaded(2, now_ms(), 10).unwrap();

    cache.clean_cache().await;

    assert!(catalog.find_by_id(1).unwrap().is_none());
    assert!(catalog.find_by_id(2).unwrap().is_some());
}

#[tokio::test]
async fn cleaning_restores_the_budget_after_an_overshoot() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::ZERO));

    // Proxy-path prefetches carry no size up front, so two of them can
    // land at 40 bytes each against a budget of 50.
    let cache = manager(catalog.clone(), fetcher, dir.path(), 50, 4);
    catalog.upsert(&item(1, "/h/1.mp4", 0)).unwrap();
    catalog.upsert(&item(2, "/h/2.mp4", 0)).unwrap();
    catalog.mark_downloaded(1, now_ms() - 5_000, 40).unwrap();
    catalog.mark_downloaded(2, now_ms() - 1_000, 40).unwrap();
    assert!(catalog.total_cached_size().unwrap() > 50);

    cache.clean_cache().await;

    // Oldest first, and only until the budget holds again.
    assert!(catalog.find_by_id(1).unwrap().is_none());
    assert!(catalog.find_by_id(2).unwrap().is_some());
    assert!(catalog.total_cached_size().unwrap() <= 50);
}

// =============================================================================
// On-disk layout
// =============================================================================

#[tokio::test]
async fn database_lives_outside_the_served_content_tree() {
    let root = TempDir::new().unwrap();
    let catalog = Arc::new(SqliteCatalog::open(root.path()).unwrap());
    let fetcher = Arc::new(FakeFetcher::new(Duration::ZERO));

    // Production wiring: the catalog opens at the cache root, fetched
    // files land under content/ and only that subtree is served.
    let content_root = root.path().join("content");
    let cache = manager(catalog.clone(), fetcher.clone(), &content_root, 1_000, 4);

    let content = item(1, "/i/1.mp4", 10);
    fetcher.serve(&content.origin_url, 10);
    catalog.upsert(&content).unwrap();
    cache.update_cache(ranked(&[1]), Vec::new()).await;
    wait_until(|| catalog.downloaded_ids().unwrap().len() == 1).await;

    assert!(root.path().join("catalog.db").exists());
    assert!(content_root.join("i/1.mp4").exists());
    assert!(!content_root.join("catalog.db").exists());
}
