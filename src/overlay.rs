//! Peer directory capability
//!
//! The overlay transport itself (join, bootstrap, DHT put/get) lives
//! outside this node; the core only needs "who advertises replica X" and
//! the local node's own advertised position. Production wiring talks to
//! the directory over HTTP; tests inject fakes.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::TransportError;
use crate::model::PeerInfo;

/// Overlay lookup: which remote nodes hold or advertise a content item.
/// Consumed read-only.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn lookup_providers(&self, content_id: i64) -> Result<Vec<PeerInfo>, TransportError>;
    async fn local_info(&self) -> Result<PeerInfo, TransportError>;
}

/// Great-circle distance between two coordinates, in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// HTTP client for a remote peer-directory service.
pub struct HttpPeerDirectory {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ProvidersResponse {
    providers: Vec<PeerInfo>,
}

impl HttpPeerDirectory {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, TransportError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }
}

#[async_trait]
impl PeerDirectory for HttpPeerDirectory {
    async fn lookup_providers(&self, content_id: i64) -> Result<Vec<PeerInfo>, TransportError> {
        let url = format!("{}/providers/{}", self.base_url, content_id);
        let response: ProvidersResponse = self.get_json(&url).await?;
        debug!(content_id, count = response.providers.len(), "Provider lookup");
        Ok(response.providers)
    }

    async fn local_info(&self) -> Result<PeerInfo, TransportError> {
        let url = format!("{}/local", self.base_url);
        self.get_json(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_same_point() {
        assert!(haversine_km(47.37, 8.54, 47.37, 8.54).abs() < 1e-9);
    }

    #[test]
    fn haversine_known_distance() {
        // Zurich to Athens is roughly 1660 km.
        let d = haversine_km(47.3769, 8.5417, 37.9838, 23.7275);
        assert!(d > 1500.0 && d < 1800.0, "got {d}");
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = haversine_km(52.52, 13.40, 40.71, -74.00);
        let b = haversine_km(40.71, -74.00, 52.52, 13.40);
        assert!((a - b).abs() < 1e-6);
    }
}
