//! edgecache-node: predictive cache management for a P2P edge-caching node.
//!
//! Two independent predictors rank content by expected local demand: one
//! from decayed social-engagement signals scored through a periodically
//! retrained linear model, one from the geographic replica distribution of
//! the peer overlay. A cache manager fuses both rankings into admission and
//! eviction decisions under a byte budget, and a request interceptor serves
//! cached content locally while recording the access events that feed the
//! next training cycle.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod model;
pub mod overlay;
pub mod predict;
pub mod proxy;
pub mod scheduler;
pub mod server;
