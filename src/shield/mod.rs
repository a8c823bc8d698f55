mod abuse;
pub mod audit;
mod latency;
mod metrics;

#[cfg(test)]
mod abuse_tests;

pub use abuse::AbuseControl;
pub use latency::LatencySketch;
pub use metrics::{ProtectionMetrics, ProtectionSnapshot, ThreatLevel};

use crate::config::ShieldConfig;
use std::time::{SystemTime, UNIX_EPOCH};

/// How often expired bans, stale violation windows, and the active-set
/// bound are swept.
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(120);

/// The process-wide observability/abuse aggregate.
///
/// One instance per process, injected by `Arc` into the request handler and
/// the admin server. All in-process mutable state (ban index, violation
/// tracker, protection counters, latency ring, active-client map) lives
/// here; the shared store owns bucket state exclusively.
pub struct Shield {
    pub abuse: AbuseControl,
    pub metrics: ProtectionMetrics,
}

impl Shield {
    pub fn new(config: &ShieldConfig) -> Self {
        Self {
            abuse: AbuseControl::new(&config.abuse),
            metrics: ProtectionMetrics::new(config.latency_history_size),
        }
    }

    /// Render the protection metric families (appended to the operational
    /// families on `/metrics`).
    pub fn render_metrics(&self, now_ms: u64) -> String {
        let mut out = String::with_capacity(2048);
        self.metrics.render_into(
            &mut out,
            self.abuse.active_count(),
            self.abuse.banned_count(now_ms),
        );
        out
    }
}

/// Wall-clock milliseconds since the epoch. The in-process abuse state uses
/// wall time; only bucket arithmetic uses the store's clock.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
