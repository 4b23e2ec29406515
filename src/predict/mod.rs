//! Popularity predictors and the model-retraining loop.
//!
//! Two independent predictors rank content for the cache manager: one from
//! social-engagement signals, one from overlay replica locality. The
//! trainer periodically refits the engagement model against observed
//! accesses.

pub mod engagement;
pub mod locality;
pub mod trainer;

pub use engagement::EngagementPredictor;
pub use locality::LocalityPredictor;
pub use trainer::{ModelTrainer, MIN_TRAINING_SAMPLES};
