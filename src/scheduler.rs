//! Background scheduler
//!
//! Runs the three periodic cycles: prediction+fusion, cache cleaning, and
//! model retraining. Each loop ticks on its own interval and stops when the
//! shutdown signal fires; fetch jobs spawned by a cycle run independently on
//! the runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::CacheManager;
use crate::model::now_ms;
use crate::predict::{EngagementPredictor, LocalityPredictor, ModelTrainer};

pub struct Scheduler {
    engagement: Option<Arc<EngagementPredictor>>,
    locality: Option<Arc<LocalityPredictor>>,
    trainer: Option<Arc<ModelTrainer>>,
    cache: Arc<CacheManager>,
    prediction_interval: Duration,
    clean_interval: Duration,
    training_interval: Duration,
}

impl Scheduler {
    pub fn new(
        engagement: Option<Arc<EngagementPredictor>>,
        locality: Option<Arc<LocalityPredictor>>,
        trainer: Option<Arc<ModelTrainer>>,
        cache: Arc<CacheManager>,
        prediction_interval: Duration,
        clean_interval: Duration,
        training_interval: Duration,
    ) -> Self {
        Self {
            engagement,
            locality,
            trainer,
            cache,
            prediction_interval,
            clean_interval,
            training_interval,
        }
    }

    /// Spawn the three periodic loops. Each stops when `shutdown` changes.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) {
        let engagement = self.engagement;
        let locality = self.locality;
        let cache = self.cache.clone();
        let prediction_interval = self.prediction_interval;
        let mut rx = shutdown.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(prediction_interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        run_prediction_cycle(engagement.as_deref(), locality.as_deref(), &cache)
                            .await;
                    }
                    _ = rx.changed() => {
                        info!("Prediction loop stopping");
                        break;
                    }
                }
            }
        });

        let cache = self.cache.clone();
        let clean_interval = self.clean_interval;
        let mut rx = shutdown.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(clean_interval);
            // The first tick fires immediately; cleaning at boot is wasted
            // work on an empty cache.
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        cache.clean_cache().await;
                    }
                    _ = rx.changed() => {
                        info!("Cleaning loop stopping");
                        break;
                    }
                }
            }
        });

        if let Some(trainer) = self.trainer {
            let training_interval = self.training_interval;
            let mut rx = shutdown;
            tokio::spawn(async move {
                let mut timer = tokio::time::interval(training_interval);
                timer.tick().await;
                loop {
                    tokio::select! {
                        _ = timer.tick() => {
                            if let Err(e) = trainer.train(now_ms()).await {
                                warn!(error = %e, "Training cycle skipped, keeping current model");
                            }
                        }
                        _ = rx.changed() => {
                            info!("Training loop stopping");
                            break;
                        }
                    }
                }
            });
        }
    }
}

/// One prediction+fusion cycle. A disabled or failed predictor contributes
/// an empty list; fusion runs regardless so absence tracking keeps moving.
async fn run_prediction_cycle(
    engagement: Option<&EngagementPredictor>,
    locality: Option<&LocalityPredictor>,
    cache: &CacheManager,
) {
    let now = now_ms();
    let engagement_ranked = match engagement {
        Some(predictor) => predictor.predict(now).await,
        None => Vec::new(),
    };
    let locality_ranked = match locality {
        Some(predictor) => predictor.predict(now).await,
        None => Vec::new(),
    };
    info!(
        engagement = engagement_ranked.len(),
        locality = locality_ranked.len(),
        "Prediction cycle complete"
    );
    cache.update_cache(engagement_ranked, locality_ranked).await;
}
