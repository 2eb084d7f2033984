//! Periodic pool gauges
//!
//! Counters are bumped inline by acquire/release; the per-state gauge needs a
//! full scan, so it is refreshed on a timer instead of on every transition.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::pool::{CategoryCounts, Pool};

/// Spawn a background task that publishes `pool_credentials` every `interval`.
///
/// Publishes once immediately so the gauge exists before the first scrape.
pub fn spawn_gauge_task(pool: Arc<Pool>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let counts = pool.counts().await;
            publish(&counts);
            debug!(categories = counts.len(), "pool gauges refreshed");
        }
    })
}

/// Set `pool_credentials{category, state}` from a snapshot of counts.
pub fn publish(counts: &[CategoryCounts]) {
    for c in counts {
        for (state, n) in [
            ("available", c.available),
            ("leased", c.leased),
            ("banned", c.banned),
            ("inactive", c.inactive),
        ] {
            metrics::gauge!(
                "pool_credentials",
                "category" => c.category.clone(),
                "state" => state
            )
            .set(n as f64);
        }
    }
}
