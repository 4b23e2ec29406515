//! Request interceptor
//!
//! Sits on the client-facing proxy path. Each inbound request is classified
//! against the known content-origin URL shapes; cached media is rewritten to
//! the local cache server and logged as an access, everything else passes
//! through unmodified, optionally kicking off an opportunistic prefetch.
//!
//! Classification and the serve/prefetch/pass decision are pure functions so
//! they can be tested without an HTTP stack; `RequestInterceptor` wraps them
//! with catalog lookups and side effects.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{cache_rel_path, CacheManager};
use crate::catalog::Catalog;
use crate::model::{now_ms, AccessEvent, ContentItem};

/// URL shapes of the supported content origin. Watch pages name a content id
/// as their last path segment; media requests address an mp4 file on one of
/// the origin's delivery hosts, with an optional stream token query.
pub struct OriginPatterns {
    watch: Regex,
    media: Regex,
}

impl OriginPatterns {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            watch: Regex::new(r"^https?://vimeo\.com(/[^/]+)*/\d+$")?,
            media: Regex::new(
                r"^https?://[^/]*vimeo[^/]*/(video/)?(\d+/)+\d+\.mp4(\?.*)?$",
            )?,
        })
    }

    /// Classify a request by its full URL and request URI. The URI is the
    /// canonical lookup key; if it does not carry the media file name the
    /// path is derived from the URL instead.
    pub fn classify(&self, url: &str, uri: &str) -> RequestKind {
        if self.media.is_match(url) {
            let path = strip_query(uri).to_string();
            if let Some(content_id) = media_content_id(&path) {
                return RequestKind::Media { content_id, path };
            }
            let path = cache_rel_path(url);
            return match media_content_id(&path) {
                Some(content_id) => RequestKind::Media { content_id, path },
                None => RequestKind::Other,
            };
        }
        if self.watch.is_match(url) {
            if let Some(content_id) = trailing_id(url) {
                return RequestKind::Watch { content_id };
            }
        }
        RequestKind::Other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Watch-page request naming a content id.
    Watch { content_id: i64 },
    /// Direct media request; `path` is the request URI without its query.
    Media { content_id: i64, path: String },
    /// Not content traffic.
    Other,
}

/// Outcome of interception, as seen by the proxy layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProxyDecision {
    PassThrough,
    Rewrite { target: String },
}

/// What the interceptor should do for a classified request, given the
/// catalog's view of the addressed item. Pure; side effects happen in
/// [`RequestInterceptor::intercept`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyPlan {
    PassThrough,
    /// Enqueue a fetch for the item, then pass through.
    Prefetch(ContentItem),
    /// Serve the cached copy: rewrite and record the access.
    Serve(ContentItem),
}

pub fn plan(kind: &RequestKind, existing: Option<ContentItem>, url: &str) -> ProxyPlan {
    match kind {
        RequestKind::Other => ProxyPlan::PassThrough,
        RequestKind::Watch { .. } => match existing {
            // A watch page itself is never cacheable bytes; it only hints
            // that the already-known media item is worth having.
            Some(item) if !item.downloaded => ProxyPlan::Prefetch(item),
            _ => ProxyPlan::PassThrough,
        },
        RequestKind::Media { content_id, path } => match existing {
            Some(item) if item.downloaded => ProxyPlan::Serve(item),
            Some(item) => ProxyPlan::Prefetch(item),
            None => {
                let now = now_ms();
                ProxyPlan::Prefetch(ContentItem {
                    content_id: *content_id,
                    origin_url: url.to_string(),
                    path: path.clone(),
                    size: 0,
                    publish_time: now,
                    cache_time: 0,
                    downloaded: false,
                })
            }
        },
    }
}

pub struct RequestInterceptor {
    patterns: OriginPatterns,
    catalog: Arc<dyn Catalog>,
    cache: Arc<CacheManager>,
    /// Host (and optional port) of the local cache HTTP server.
    local_host: String,
}

impl RequestInterceptor {
    pub fn new(
        patterns: OriginPatterns,
        catalog: Arc<dyn Catalog>,
        cache: Arc<CacheManager>,
        local_host: String,
    ) -> Self {
        Self {
            patterns,
            catalog,
            cache,
            local_host,
        }
    }

    /// Decide a single request. Never blocks on a fetch: a cache miss
    /// enqueues at most one job and returns immediately. A storage failure
    /// downgrades to pass-through so the client is never blocked by the
    /// cache layer.
    pub fn intercept(&self, url: &str, uri: &str, client_addr: &str) -> ProxyDecision {
        let kind = self.patterns.classify(url, uri);

        let existing = match &kind {
            RequestKind::Other => None,
            RequestKind::Watch { content_id } => match self.catalog.find_by_id(*content_id) {
                Ok(item) => item,
                Err(e) => {
                    warn!(url, error = %e, "Catalog lookup failed, passing through");
                    return ProxyDecision::PassThrough;
                }
            },
            RequestKind::Media { path, .. } => match self.catalog.find_by_path(path) {
                Ok(item) => item,
                Err(e) => {
                    warn!(url, error = %e, "Catalog lookup failed, passing through");
                    return ProxyDecision::PassThrough;
                }
            },
        };

        match plan(&kind, existing, url) {
            ProxyPlan::PassThrough => ProxyDecision::PassThrough,
            ProxyPlan::Prefetch(item) => {
                debug!(content_id = item.content_id, url, "Opportunistic prefetch");
                if let Err(e) = self.catalog.upsert(&item) {
                    warn!(content_id = item.content_id, error = %e, "Failed to record content metadata");
                } else {
                    self.cache.request_fetch(item);
                }
                ProxyDecision::PassThrough
            }
            ProxyPlan::Serve(item) => {
                info!(
                    content_id = item.content_id,
                    client_addr, "Serving from local cache"
                );
                let event = AccessEvent {
                    content_id: item.content_id,
                    client_addr: client_addr.to_string(),
                    timestamp: now_ms(),
                };
                // The serve itself must not fail on a logging error.
                if let Err(e) = self.catalog.record_access(&event) {
                    warn!(content_id = item.content_id, error = %e, "Failed to record access");
                }
                ProxyDecision::Rewrite {
                    target: format!("http://{}/cache{}", self.local_host, item.path),
                }
            }
        }
    }
}

fn strip_query(uri: &str) -> &str {
    uri.split('?').next().unwrap_or(uri)
}

/// Content id embedded in a media path: the digits of the final file stem.
fn media_content_id(path: &str) -> Option<i64> {
    let stem = path.rsplit('/').next()?.strip_suffix(".mp4")?;
    stem.parse().ok()
}

/// Content id of a watch URL: its trailing digit run.
fn trailing_id(url: &str) -> Option<i64> {
    url.rsplit('/').next()?.parse().ok()
}
