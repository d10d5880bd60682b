//! Shared state for the relay routes

use std::sync::Arc;

use crate::storage::DailyLog;

use super::upstream::UpstreamClient;

/// Cloned into every handler; everything inside is per worker process
#[derive(Clone)]
pub struct RelayState {
    pub upstream: UpstreamClient,
    pub daily_log: Arc<DailyLog>,
    /// Process-wide credential used when the caller sends none
    pub fallback_key: Option<Arc<str>>,
}

impl RelayState {
    pub fn new(
        upstream: UpstreamClient,
        daily_log: Arc<DailyLog>,
        fallback_key: Option<String>,
    ) -> Self {
        Self {
            upstream,
            daily_log,
            fallback_key: fallback_key.map(Arc::from),
        }
    }
}

/// Request id: worker pid plus a per-process sequence number
pub fn generate_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", std::process::id(), count)
}
