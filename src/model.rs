//! Shared data model for the caching core.
//!
//! Content items and access events are owned by the catalog; feed signals
//! and peer info come from the external capabilities. Prediction scores are
//! ephemeral and recomputed every cycle.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One cacheable content item. Unique by `content_id`; `path` is relative
/// to the cache root and doubles as the proxy lookup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub content_id: i64,
    pub origin_url: String,
    pub path: String,
    pub size: u64,
    /// When the content was published at its origin (unix ms).
    pub publish_time: i64,
    /// When the content entered the local cache (unix ms); meaningful only
    /// once `downloaded` is true.
    pub cache_time: i64,
    /// False while a fetch is in flight or has never happened.
    pub downloaded: bool,
}

/// Append-only record of a successful local serve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessEvent {
    pub content_id: i64,
    pub client_addr: String,
    pub timestamp: i64,
}

/// Kind of social-engagement signal referencing a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    OwnPost,
    FriendPost,
    FriendLike,
    FriendComment,
}

/// A social-graph event referencing a content identifier, supplied by the
/// external feed source. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSignal {
    pub content_id: i64,
    pub kind: SignalKind,
    pub timestamp: i64,
}

/// Which predictor produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreSource {
    Engagement,
    Locality,
}

/// One predictor's opinion about one content item, produced fresh each
/// prediction cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionScore {
    pub content_id: i64,
    pub source: ScoreSource,
    pub value: f64,
    /// Timestamp of the most recent signal backing this score; used as the
    /// first tie-breaker so repeated cycles order identically.
    pub latest_signal: i64,
}

/// Sort a prediction list into its canonical ranked order: score
/// descending, then most-recent signal first, then content id ascending.
pub fn sort_ranked(scores: &mut [PredictionScore]) {
    scores.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| b.latest_signal.cmp(&a.latest_signal))
            .then_with(|| a.content_id.cmp(&b.content_id))
    });
}

/// Linear engagement model in log-odds space: five feature coefficients
/// plus an intercept. Superseded wholesale on each successful retraining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementModel {
    pub lambda: [f64; 5],
    pub intercept: f64,
}

impl Default for EngagementModel {
    /// Cold-start model: all-zero coefficients. Scoring still yields a
    /// stable, deterministic ordering via the tie-break rule.
    fn default() -> Self {
        Self {
            lambda: [0.0; 5],
            intercept: 0.0,
        }
    }
}

impl EngagementModel {
    pub fn score(&self, features: &[f64; 5]) -> f64 {
        self.lambda
            .iter()
            .zip(features)
            .map(|(l, f)| l * f)
            .sum::<f64>()
            + self.intercept
    }
}

/// Single-writer, multi-reader holder for the current engagement model.
///
/// Readers clone the inner `Arc`, so a concurrent swap is observed either
/// entirely before or entirely after — never as a torn coefficient vector.
#[derive(Debug, Default)]
pub struct ModelHandle {
    inner: RwLock<Arc<EngagementModel>>,
}

impl ModelHandle {
    pub fn new(model: EngagementModel) -> Self {
        Self {
            inner: RwLock::new(Arc::new(model)),
        }
    }

    /// Snapshot of the current model.
    pub fn current(&self) -> Arc<EngagementModel> {
        self.inner.read().expect("model lock poisoned").clone()
    }

    /// Atomically replace the model.
    pub fn replace(&self, model: EngagementModel) {
        *self.inner.write().expect("model lock poisoned") = Arc::new(model);
    }
}

/// A remote node in the overlay, with its advertised location.
/// Supplied by the peer directory; read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub addr: String,
    pub port: u16,
    pub latitude: f64,
    pub longitude: f64,
}
