//! Model trainer
//!
//! Periodically refits the engagement model against ground truth: for each
//! cached item, the cumulative decayed feature vector at training time is
//! regressed (ordinary least squares, with intercept) on the observed view
//! rate in log-odds form. A successful fit atomically replaces the model;
//! any failure leaves the previous model in force.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::ModelFitError;
use crate::feed::FeedSource;
use crate::model::{EngagementModel, FeedSignal, ModelHandle};
use crate::predict::engagement::engagement_features;

/// Minimum sample count for a fit, matching the six-coefficient model.
pub const MIN_TRAINING_SAMPLES: usize = 6;

/// Observed probabilities are capped below certainty and floored above
/// zero so the logit target stays finite.
const P_CAP: f64 = 0.99;
const P_FLOOR: f64 = 1e-7;

const DAY_MS: i64 = 24 * 60 * 60_000;

/// One regression sample, derived fresh each training cycle.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub content_id: i64,
    pub features: [f64; 5],
    pub target_logit: f64,
}

/// Observed view probability: views per elapsed day since caching, capped
/// at `P_CAP`; raw view count while the item is less than a day old.
pub fn observed_probability(views: f64, elapsed_ms: i64) -> f64 {
    let intervals = elapsed_ms / DAY_MS;
    let p = if intervals == 0 {
        views.min(P_CAP)
    } else {
        (views / intervals as f64).min(P_CAP)
    };
    p.max(P_FLOOR)
}

/// Log-odds transform of a clamped probability.
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

pub struct ModelTrainer {
    catalog: Arc<dyn Catalog>,
    feed: Arc<dyn FeedSource>,
    model: Arc<ModelHandle>,
    half_life_ms: i64,
}

impl ModelTrainer {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        feed: Arc<dyn FeedSource>,
        model: Arc<ModelHandle>,
        half_life_ms: i64,
    ) -> Self {
        Self {
            catalog,
            feed,
            model,
            half_life_ms,
        }
    }

    /// Run one training cycle. On success the active model is replaced
    /// wholesale; on any failure it is left untouched and the error is
    /// reported to the caller for logging.
    pub async fn train(&self, now_ms: i64) -> Result<(), ModelFitError> {
        let samples = self.build_samples(now_ms).await?;
        if samples.len() < MIN_TRAINING_SAMPLES {
            return Err(ModelFitError::NotEnoughSamples {
                got: samples.len(),
                need: MIN_TRAINING_SAMPLES,
            });
        }

        let fitted = fit_ols(&samples)?;
        info!(
            samples = samples.len(),
            intercept = fitted.intercept,
            "Engagement model refitted"
        );
        self.model.replace(fitted);
        Ok(())
    }

    async fn build_samples(&self, now_ms: i64) -> Result<Vec<TrainingSample>, ModelFitError> {
        let rows = self
            .catalog
            .all_with_accesses()
            .map_err(|e| ModelFitError::Data(e.to_string()))?;

        // Full signal history: the training features are cumulative.
        let signals = self
            .feed
            .recent_signals(0)
            .await
            .map_err(|e| ModelFitError::Data(e.to_string()))?;
        let mut by_content: HashMap<i64, Vec<FeedSignal>> = HashMap::new();
        for signal in signals {
            by_content.entry(signal.content_id).or_default().push(signal);
        }

        let mut samples = Vec::with_capacity(rows.len());
        for (item, accesses) in rows {
            let content_signals = by_content
                .get(&item.content_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let features = engagement_features(
                content_signals,
                &accesses,
                now_ms,
                self.half_life_ms,
            );

            let views = accesses.len() as f64;
            let p = observed_probability(views, now_ms - item.cache_time);
            let target_logit = logit(p);
            if !target_logit.is_finite() || features.iter().any(|f| !f.is_finite()) {
                return Err(ModelFitError::NonFinite(item.content_id));
            }

            debug!(
                content_id = item.content_id,
                views, p, target_logit, "Training sample"
            );
            samples.push(TrainingSample {
                content_id: item.content_id,
                features,
                target_logit,
            });
        }
        Ok(samples)
    }
}

/// Ordinary least squares of the logit target on the five features plus an
/// intercept, via the normal equations. The 6x6 system is solved with
/// Gaussian elimination and partial pivoting; a vanishing pivot means the
/// design matrix is rank-deficient and the fit is rejected.
pub fn fit_ols(samples: &[TrainingSample]) -> Result<EngagementModel, ModelFitError> {
    const DIM: usize = 6;

    if samples.len() < MIN_TRAINING_SAMPLES {
        return Err(ModelFitError::NotEnoughSamples {
            got: samples.len(),
            need: MIN_TRAINING_SAMPLES,
        });
    }

    // Normal equations: (XᵀX) β = Xᵀy with X = [1 | features].
    let mut xtx = [[0.0_f64; DIM]; DIM];
    let mut xty = [0.0_f64; DIM];
    for sample in samples {
        let mut row = [1.0_f64; DIM];
        row[1..].copy_from_slice(&sample.features);
        for i in 0..DIM {
            for j in 0..DIM {
                xtx[i][j] += row[i] * row[j];
            }
            xty[i] += row[i] * sample.target_logit;
        }
    }

    let beta = solve(xtx, xty)?;
    let mut lambda = [0.0; 5];
    lambda.copy_from_slice(&beta[1..]);
    Ok(EngagementModel {
        lambda,
        intercept: beta[0],
    })
}

fn solve(mut a: [[f64; 6]; 6], mut b: [f64; 6]) -> Result<[f64; 6], ModelFitError> {
    const DIM: usize = 6;
    const PIVOT_EPS: f64 = 1e-10;

    for col in 0..DIM {
        // Partial pivoting keeps the elimination numerically stable.
        let pivot_row = (col..DIM)
            .max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))
            .unwrap_or(col);
        if a[pivot_row][col].abs() < PIVOT_EPS {
            return Err(ModelFitError::Singular);
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..DIM {
            let factor = a[row][col] / a[col][col];
            for k in col..DIM {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0_f64; DIM];
    for row in (0..DIM).rev() {
        let mut sum = b[row];
        for k in (row + 1)..DIM {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(ModelFitError::Singular);
    }
    Ok(x)
}
