//! Engagement predictor
//!
//! Ranks content by predicted likelihood of local-user interest. For every
//! content id seen in recent feed history, five exponentially decayed
//! features are extracted (own posts, friend posts, friend likes, friend
//! comments, and local access history) and scored through the current
//! linear engagement model in log-odds space.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::feed::FeedSource;
use crate::model::{
    sort_ranked, AccessEvent, FeedSignal, ModelHandle, PredictionScore, ScoreSource, SignalKind,
};

/// Exponential decay weight for a signal of the given age: 1.0 when fresh,
/// halved every `half_life_ms`.
pub fn decay_weight(age_ms: i64, half_life_ms: i64) -> f64 {
    if age_ms <= 0 {
        return 1.0;
    }
    0.5_f64.powf(age_ms as f64 / half_life_ms as f64)
}

/// Decayed feature vector for one content item: sums of decay weights for
/// own posts, friend posts, friend likes, friend comments, and recorded
/// local accesses, in that order.
pub fn engagement_features(
    signals: &[FeedSignal],
    accesses: &[AccessEvent],
    now_ms: i64,
    half_life_ms: i64,
) -> [f64; 5] {
    let mut features = [0.0; 5];
    for signal in signals {
        let w = decay_weight(now_ms - signal.timestamp, half_life_ms);
        let idx = match signal.kind {
            SignalKind::OwnPost => 0,
            SignalKind::FriendPost => 1,
            SignalKind::FriendLike => 2,
            SignalKind::FriendComment => 3,
        };
        features[idx] += w;
    }
    for access in accesses {
        features[4] += decay_weight(now_ms - access.timestamp, half_life_ms);
    }
    features
}

pub struct EngagementPredictor {
    feed: Arc<dyn FeedSource>,
    catalog: Arc<dyn Catalog>,
    model: Arc<ModelHandle>,
    half_life_ms: i64,
    window_ms: i64,
}

impl EngagementPredictor {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        catalog: Arc<dyn Catalog>,
        model: Arc<ModelHandle>,
        half_life_ms: i64,
        window_ms: i64,
    ) -> Self {
        Self {
            feed,
            catalog,
            model,
            half_life_ms,
            window_ms,
        }
    }

    /// Produce the ranked engagement list for this cycle. Failures are
    /// logged and shrink the result; they never abort the cycle.
    pub async fn predict(&self, now_ms: i64) -> Vec<PredictionScore> {
        let signals = match self.feed.recent_signals(now_ms - self.window_ms).await {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "Feed unavailable, skipping engagement prediction");
                return Vec::new();
            }
        };

        let mut by_content: HashMap<i64, Vec<FeedSignal>> = HashMap::new();
        for signal in signals {
            by_content.entry(signal.content_id).or_default().push(signal);
        }

        let model = self.model.current();
        let mut ranked = Vec::with_capacity(by_content.len());

        for (content_id, signals) in by_content {
            let accesses = match self.catalog.accesses_for(content_id) {
                Ok(accesses) => accesses,
                Err(e) => {
                    warn!(content_id, error = %e, "Access lookup failed, skipping item");
                    continue;
                }
            };

            let features =
                engagement_features(&signals, &accesses, now_ms, self.half_life_ms);
            let value = model.score(&features);
            let latest_signal = signals.iter().map(|s| s.timestamp).max().unwrap_or(0);
            debug!(content_id, value, "Engagement score");

            ranked.push(PredictionScore {
                content_id,
                source: ScoreSource::Engagement,
                value,
                latest_signal,
            });
        }

        sort_ranked(&mut ranked);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EngagementModel;

    const HOUR: i64 = 3_600_000;

    fn signal(content_id: i64, kind: SignalKind, timestamp: i64) -> FeedSignal {
        FeedSignal {
            content_id,
            kind,
            timestamp,
        }
    }

    #[test]
    fn decay_halves_per_half_life() {
        assert_eq!(decay_weight(0, HOUR), 1.0);
        assert!((decay_weight(HOUR, HOUR) - 0.5).abs() < 1e-12);
        assert!((decay_weight(2 * HOUR, HOUR) - 0.25).abs() < 1e-12);
        // Future-dated signals count as fresh.
        assert_eq!(decay_weight(-5, HOUR), 1.0);
    }

    #[test]
    fn features_split_by_signal_kind() {
        let now = 10 * HOUR;
        let signals = vec![
            signal(1, SignalKind::OwnPost, now),
            signal(1, SignalKind::FriendPost, now),
            signal(1, SignalKind::FriendPost, now - HOUR),
            signal(1, SignalKind::FriendLike, now),
            signal(1, SignalKind::FriendComment, now),
        ];
        let accesses = vec![AccessEvent {
            content_id: 1,
            client_addr: "10.0.0.1".into(),
            timestamp: now,
        }];

        let f = engagement_features(&signals, &accesses, now, HOUR);
        assert!((f[0] - 1.0).abs() < 1e-12);
        assert!((f[1] - 1.5).abs() < 1e-12);
        assert!((f[2] - 1.0).abs() < 1e-12);
        assert!((f[3] - 1.0).abs() < 1e-12);
        assert!((f[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn recent_signals_dominate() {
        let now = 100 * HOUR;
        let fresh = engagement_features(
            &[signal(1, SignalKind::FriendPost, now)],
            &[],
            now,
            HOUR,
        );
        let stale = engagement_features(
            &[signal(1, SignalKind::FriendPost, now - 50 * HOUR)],
            &[],
            now,
            HOUR,
        );
        assert!(fresh[1] > stale[1]);
    }

    #[test]
    fn model_scores_features_linearly() {
        let model = EngagementModel {
            lambda: [2.0, 0.0, 0.0, 0.0, 1.0],
            intercept: 0.5,
        };
        let score = model.score(&[1.0, 9.0, 9.0, 9.0, 3.0]);
        assert!((score - (2.0 + 3.0 + 0.5)).abs() < 1e-12);
    }
}
