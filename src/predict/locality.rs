//! Locality predictor
//!
//! Ranks content by the marginal value of caching it locally given the
//! overlay's replica distribution. Close existing replicas make a local
//! copy less valuable, so the score decreases as replicas get nearer or
//! more numerous; content nobody advertises scores maximal.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::model::{sort_ranked, PeerInfo, PredictionScore, ScoreSource};
use crate::overlay::{haversine_km, PeerDirectory};

/// Proximity weight of one replica at distance `d_km`: 1.0 next door,
/// falling off hyperbolically with the configured distance scale.
fn proximity_weight(d_km: f64, scale_km: f64) -> f64 {
    1.0 / (1.0 + d_km / scale_km)
}

/// Marginal caching value given the distances of known replicas.
/// No replicas ⇒ 1.0; each replica subtracts more the closer it is.
pub fn replica_score(distances_km: &[f64], scale_km: f64) -> f64 {
    let pressure: f64 = distances_km
        .iter()
        .map(|d| proximity_weight(*d, scale_km))
        .sum();
    1.0 / (1.0 + pressure)
}

pub struct LocalityPredictor {
    directory: Arc<dyn PeerDirectory>,
    catalog: Arc<dyn Catalog>,
    scale_km: f64,
}

impl LocalityPredictor {
    pub fn new(
        directory: Arc<dyn PeerDirectory>,
        catalog: Arc<dyn Catalog>,
        scale_km: f64,
    ) -> Self {
        Self {
            directory,
            catalog,
            scale_km,
        }
    }

    /// Produce the ranked locality list for this cycle. A failed provider
    /// lookup excludes only that content id; a failed local-info lookup
    /// abandons the whole cycle (empty list).
    pub async fn predict(&self, _now_ms: i64) -> Vec<PredictionScore> {
        let local = match self.directory.local_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Local overlay info unavailable, skipping locality prediction");
                return Vec::new();
            }
        };

        let candidates = match self.catalog.all_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Catalog unavailable, skipping locality prediction");
                return Vec::new();
            }
        };

        let mut ranked = Vec::with_capacity(candidates.len());
        for content_id in candidates {
            let providers = match self.directory.lookup_providers(content_id).await {
                Ok(providers) => providers,
                Err(e) => {
                    warn!(content_id, error = %e, "Provider lookup failed, skipping item");
                    continue;
                }
            };

            let distances = provider_distances(&local, &providers);
            let value = replica_score(&distances, self.scale_km);
            debug!(content_id, replicas = distances.len(), value, "Locality score");

            ranked.push(PredictionScore {
                content_id,
                source: ScoreSource::Locality,
                value,
                latest_signal: 0,
            });
        }

        sort_ranked(&mut ranked);
        ranked
    }
}

/// Distances from the local node to each distinct provider. Directory
/// replies may repeat a peer; duplicates are dropped by peer id before
/// aggregation.
fn provider_distances(local: &PeerInfo, providers: &[PeerInfo]) -> Vec<f64> {
    let mut seen = HashSet::new();
    providers
        .iter()
        .filter(|p| seen.insert(p.peer_id.clone()))
        .map(|p| haversine_km(local.latitude, local.longitude, p.latitude, p.longitude))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, lat: f64, lon: f64) -> PeerInfo {
        PeerInfo {
            peer_id: id.to_string(),
            addr: "10.0.0.9".to_string(),
            port: 4001,
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn no_replicas_scores_maximal() {
        assert_eq!(replica_score(&[], 500.0), 1.0);
        assert!(replica_score(&[100.0], 500.0) < 1.0);
    }

    #[test]
    fn closer_replica_never_raises_score() {
        // Monotonicity: adding a peer strictly closer than all existing
        // ones must not increase the caching value.
        let far_only = replica_score(&[2000.0], 500.0);
        let with_near = replica_score(&[2000.0, 50.0], 500.0);
        assert!(with_near < far_only);

        // And a nearer replica weighs more than a farther one.
        assert!(replica_score(&[50.0], 500.0) < replica_score(&[2000.0], 500.0));
    }

    #[test]
    fn more_replicas_lower_the_score() {
        let one = replica_score(&[300.0], 500.0);
        let three = replica_score(&[300.0, 300.0, 300.0], 500.0);
        assert!(three < one);
    }

    #[test]
    fn duplicate_providers_collapse() {
        let local = peer("local", 47.0, 8.0);
        let providers = vec![
            peer("a", 48.0, 9.0),
            peer("a", 48.0, 9.0),
            peer("b", 50.0, 10.0),
        ];
        assert_eq!(provider_distances(&local, &providers).len(), 2);
    }
}
