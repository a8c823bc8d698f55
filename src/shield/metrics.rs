use crate::shield::latency::LatencySketch;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ordinal threat summary for human display, derived from whichever of
/// (banned clients, protection rate) is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn from_signals(banned_clients: u64, protection_rate: f64) -> Self {
        if banned_clients >= 5 || protection_rate >= 50.0 {
            ThreatLevel::Critical
        } else if banned_clients >= 2 || protection_rate >= 30.0 {
            ThreatLevel::High
        } else if banned_clients >= 1 || protection_rate >= 10.0 {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        }
    }

    fn as_gauge(&self) -> u64 {
        match self {
            ThreatLevel::Low => 0,
            ThreatLevel::Medium => 1,
            ThreatLevel::High => 2,
            ThreatLevel::Critical => 3,
        }
    }
}

/// Consistent point-in-time view of the protection counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectionSnapshot {
    pub allowed: u64,
    pub blocked: u64,
    pub blocked_standard: u64,
    pub blocked_malicious: u64,
    pub threats_neutralized: u64,
    pub redis_errors: u64,
    pub fail_open_events: u64,
}

impl ProtectionSnapshot {
    /// Share of decided requests that were denied, percent. A workload
    /// metric: heavy filtering is not unhealthy.
    pub fn protection_rate(&self) -> f64 {
        let decided = self.allowed + self.blocked;
        if decided == 0 {
            0.0
        } else {
            self.blocked as f64 / decided as f64 * 100.0
        }
    }

    /// Share of decided requests that reached a conclusive store verdict,
    /// percent. A health metric: a down store scores low even while
    /// fail-open keeps the traffic flowing and the protection rate "clean".
    pub fn health_score(&self) -> f64 {
        let decided = self.allowed + self.blocked;
        if decided == 0 {
            return 100.0;
        }
        let failures = (self.redis_errors + self.fail_open_events) as f64;
        (100.0 - 100.0 * failures / decided as f64).max(0.0)
    }
}

/// Protection counters and the latency sketch.
///
/// Held as process-local atomics rather than `metrics!` macro families
/// because the derived gauges (rate, health, threat level) and the quantile
/// sketch must be computed on read, and the global recorder is write-only.
pub struct ProtectionMetrics {
    requests_allowed: AtomicU64,
    requests_blocked: AtomicU64,
    blocked_standard: AtomicU64,
    blocked_malicious: AtomicU64,
    threats_neutralized: AtomicU64,
    redis_errors: AtomicU64,
    fail_open_events: AtomicU64,
    pub latency: LatencySketch,
}

impl ProtectionMetrics {
    pub fn new(latency_history_size: usize) -> Self {
        Self {
            requests_allowed: AtomicU64::new(0),
            requests_blocked: AtomicU64::new(0),
            blocked_standard: AtomicU64::new(0),
            blocked_malicious: AtomicU64::new(0),
            threats_neutralized: AtomicU64::new(0),
            redis_errors: AtomicU64::new(0),
            fail_open_events: AtomicU64::new(0),
            latency: LatencySketch::new(latency_history_size),
        }
    }

    pub fn record_allowed(&self) {
        self.requests_allowed.fetch_add(1, Ordering::Relaxed);
    }

    /// An ordinary quota denial.
    pub fn record_blocked_standard(&self) {
        self.requests_blocked.fetch_add(1, Ordering::Relaxed);
        self.blocked_standard.fetch_add(1, Ordering::Relaxed);
    }

    /// A denial attributed to a malicious client: a ban-gate short-circuit
    /// or the denial that escalated to a ban.
    pub fn record_blocked_malicious(&self) {
        self.requests_blocked.fetch_add(1, Ordering::Relaxed);
        self.blocked_malicious.fetch_add(1, Ordering::Relaxed);
    }

    /// A principal crossed the violation threshold and was banned.
    pub fn record_threat_neutralized(&self) {
        self.threats_neutralized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redis_error(&self) {
        self.redis_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail_open(&self) {
        self.fail_open_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProtectionSnapshot {
        ProtectionSnapshot {
            allowed: self.requests_allowed.load(Ordering::Relaxed),
            blocked: self.requests_blocked.load(Ordering::Relaxed),
            blocked_standard: self.blocked_standard.load(Ordering::Relaxed),
            blocked_malicious: self.blocked_malicious.load(Ordering::Relaxed),
            threats_neutralized: self.threats_neutralized.load(Ordering::Relaxed),
            redis_errors: self.redis_errors.load(Ordering::Relaxed),
            fail_open_events: self.fail_open_events.load(Ordering::Relaxed),
        }
    }

    /// Render the protection families in Prometheus text exposition format.
    /// Appended after the operational families from the global recorder.
    pub fn render_into(&self, out: &mut String, active_clients: u64, banned_clients: u64) {
        let snap = self.snapshot();
        let rate = snap.protection_rate();
        let health = snap.health_score();
        let threat = ThreatLevel::from_signals(banned_clients, rate);

        counter(out, "atlas_requests_allowed_total", "Requests admitted by the limiter", snap.allowed);
        counter(out, "atlas_requests_blocked_total", "Requests denied by the limiter", snap.blocked);
        counter(out, "atlas_blocked_standard_total", "Denials of ordinary over-quota clients", snap.blocked_standard);
        counter(out, "atlas_blocked_malicious_total", "Denials of banned or ban-crossing clients", snap.blocked_malicious);
        counter(out, "atlas_threats_neutralized_total", "Clients banned after sustained violations", snap.threats_neutralized);
        counter(out, "atlas_redis_errors_total", "Store command failures", snap.redis_errors);
        counter(out, "atlas_fail_open_events_total", "Requests admitted without a store verdict", snap.fail_open_events);

        gauge(out, "atlas_active_clients", "Distinct principals seen this process lifetime", active_clients as f64);
        gauge(out, "atlas_banned_clients", "Principals currently banned", banned_clients as f64);
        gauge(out, "atlas_protection_rate", "Percent of decided requests denied (workload, not health)", rate);
        gauge(out, "atlas_system_health_score", "Percent of decided requests with a conclusive store verdict (health, not workload)", health);
        gauge(out, "atlas_threat_level", "Threat summary: 0=LOW 1=MEDIUM 2=HIGH 3=CRITICAL", threat.as_gauge() as f64);

        let quantiles = self.latency.quantiles(&[0.5, 0.95, 0.99]);
        let _ = writeln!(out, "# HELP atlas_response_time_ms Decision latency of the admission middleware");
        let _ = writeln!(out, "# TYPE atlas_response_time_ms summary");
        for (q, v) in [("0.5", quantiles[0]), ("0.95", quantiles[1]), ("0.99", quantiles[2])] {
            let _ = writeln!(out, "atlas_response_time_ms{{quantile=\"{}\"}} {}", q, fmt_float(v));
        }
        let _ = writeln!(out, "atlas_response_time_ms_sum {}", fmt_float(self.latency.sum_ms()));
        let _ = writeln!(out, "atlas_response_time_ms_count {}", self.latency.count());
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value);
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} gauge", name);
    let _ = writeln!(out, "{} {}", name, fmt_float(value));
}

fn fmt_float(v: f64) -> String {
    if v == v.trunc() {
        format!("{}", v as i64)
    } else {
        format!("{:.3}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_level_thresholds() {
        assert_eq!(ThreatLevel::from_signals(0, 0.0), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_signals(0, 9.9), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_signals(1, 0.0), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_signals(0, 10.0), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_signals(2, 0.0), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_signals(0, 30.0), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_signals(5, 0.0), ThreatLevel::Critical);
        assert_eq!(ThreatLevel::from_signals(0, 50.0), ThreatLevel::Critical);
        // The more severe signal wins.
        assert_eq!(ThreatLevel::from_signals(1, 60.0), ThreatLevel::Critical);
    }

    #[test]
    fn test_protection_rate_zero_without_traffic() {
        let snap = ProtectionSnapshot::default();
        assert_eq!(snap.protection_rate(), 0.0);
        assert_eq!(snap.health_score(), 100.0);
    }

    #[test]
    fn test_protection_and_health_are_independent() {
        // Store fully healthy, heavy filtering: high protection rate,
        // perfect health.
        let filtering = ProtectionSnapshot {
            allowed: 20,
            blocked: 80,
            ..Default::default()
        };
        assert_eq!(filtering.protection_rate(), 80.0);
        assert_eq!(filtering.health_score(), 100.0);

        // Store down, everything failed open: clean protection rate, poor
        // health.
        let degraded = ProtectionSnapshot {
            allowed: 100,
            fail_open_events: 100,
            ..Default::default()
        };
        assert_eq!(degraded.protection_rate(), 0.0);
        assert_eq!(degraded.health_score(), 0.0);
    }

    #[test]
    fn test_health_score_clamped_to_zero() {
        let snap = ProtectionSnapshot {
            allowed: 10,
            redis_errors: 10,
            fail_open_events: 10,
            ..Default::default()
        };
        assert_eq!(snap.health_score(), 0.0);
    }

    #[test]
    fn test_counter_relationships_hold() {
        let m = ProtectionMetrics::new(16);
        m.record_allowed();
        for _ in 0..3 {
            m.record_blocked_standard();
        }
        m.record_blocked_malicious();
        m.record_threat_neutralized();

        let snap = m.snapshot();
        assert_eq!(snap.blocked_standard + snap.blocked_malicious, snap.blocked);
        assert!(snap.threats_neutralized <= snap.blocked_malicious);
        assert!(snap.blocked_malicious <= snap.blocked);

        let rate = snap.protection_rate();
        assert!((0.0..=100.0).contains(&rate));
        assert!((0.0..=100.0).contains(&snap.health_score()));
    }

    #[test]
    fn test_render_contains_families() {
        let m = ProtectionMetrics::new(16);
        m.record_allowed();
        m.record_fail_open();
        m.latency.record(1.5);

        let mut out = String::new();
        m.render_into(&mut out, 3, 1);

        assert!(out.contains("# TYPE atlas_requests_allowed_total counter"));
        assert!(out.contains("atlas_requests_allowed_total 1"));
        assert!(out.contains("atlas_active_clients 3"));
        assert!(out.contains("atlas_banned_clients 1"));
        assert!(out.contains("atlas_response_time_ms{quantile=\"0.95\"}"));
        assert!(out.contains("# TYPE atlas_system_health_score gauge"));
    }
}
