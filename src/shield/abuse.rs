use crate::config::AbuseConfig;
use dashmap::DashMap;

/// Hard cap on remembered principals. Past it, the sweeper evicts idle
/// entries and then force-evicts oldest-first down to the cap.
const ACTIVE_CLIENTS_MAX: usize = 100_000;
/// An active-set entry idle for this long is eligible for eviction once the
/// map is over the cap.
const ACTIVE_IDLE_EXPIRE_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Copy)]
struct BanRecord {
    expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct ViolationRecord {
    count: u32,
    first_violation_ms: u64,
}

/// In-process abuse state: the ban index, the per-principal violation
/// windows, and the set of principals seen this process lifetime.
///
/// Per-entry atomicity comes from the DashMap shard locks: concurrent
/// denials for one principal serialize on its entry, different principals
/// proceed in parallel. Bans are local to this replica.
pub struct AbuseControl {
    bans: DashMap<String, BanRecord>,
    violations: DashMap<String, ViolationRecord>,
    active_clients: DashMap<String, u64>,
    threshold: u32,
    window_ms: u64,
    ban_ms: u64,
}

impl AbuseControl {
    pub fn new(cfg: &AbuseConfig) -> Self {
        Self {
            bans: DashMap::new(),
            violations: DashMap::new(),
            active_clients: DashMap::new(),
            threshold: cfg.ban_threshold,
            window_ms: cfg.violation_window_ms,
            ban_ms: cfg.ban_duration_ms,
        }
    }

    /// Remember a principal for the `active_clients` gauge.
    pub fn observe_client(&self, principal: &str, now_ms: u64) {
        self.active_clients.insert(principal.to_string(), now_ms);
    }

    /// Whole seconds until a live ban expires, rounded up so `Retry-After`
    /// never undershoots. Expired bans (and their violation windows) are
    /// evicted lazily here; a request arriving exactly at expiry is admitted.
    pub fn ban_state(&self, principal: &str, now_ms: u64) -> Option<u64> {
        let expires_at_ms = self.bans.get(principal).map(|b| b.expires_at_ms)?;
        if now_ms >= expires_at_ms {
            self.bans.remove(principal);
            self.violations.remove(principal);
            return None;
        }
        Some((expires_at_ms - now_ms).div_ceil(1000))
    }

    /// Record a quota denial. Returns `true` exactly once per ban, on the
    /// denial that crosses the threshold within the window.
    pub fn track_violation(&self, principal: &str, now_ms: u64) -> bool {
        let mut entry = self
            .violations
            .entry(principal.to_string())
            .or_insert(ViolationRecord {
                count: 0,
                first_violation_ms: now_ms,
            });

        if entry.count > 0 && now_ms.saturating_sub(entry.first_violation_ms) >= self.window_ms {
            entry.count = 0;
            entry.first_violation_ms = now_ms;
        }

        entry.count += 1;
        if entry.count == self.threshold {
            self.bans.insert(
                principal.to_string(),
                BanRecord {
                    expires_at_ms: now_ms + self.ban_ms,
                },
            );
            true
        } else {
            false
        }
    }

    pub fn banned_count(&self, now_ms: u64) -> u64 {
        self.bans
            .iter()
            .filter(|b| b.expires_at_ms > now_ms)
            .count() as u64
    }

    pub fn active_count(&self) -> u64 {
        self.active_clients.len() as u64
    }

    pub fn violation_count(&self, principal: &str) -> u32 {
        self.violations.get(principal).map(|v| v.count).unwrap_or(0)
    }

    /// Periodic cleanup: expired bans, violation windows older than twice the
    /// window, and the active-set bound.
    pub fn sweep(&self, now_ms: u64) {
        self.bans.retain(|_, b| b.expires_at_ms > now_ms);

        let stale_cutoff = self.window_ms * 2;
        self.violations
            .retain(|_, v| now_ms.saturating_sub(v.first_violation_ms) < stale_cutoff);

        if self.active_clients.len() > ACTIVE_CLIENTS_MAX {
            self.active_clients
                .retain(|_, last_seen| now_ms.saturating_sub(*last_seen) < ACTIVE_IDLE_EXPIRE_MS);
        }
        if self.active_clients.len() > ACTIVE_CLIENTS_MAX {
            self.force_evict_active(now_ms);
        }
    }

    /// Oldest-first eviction down to the cap.
    fn force_evict_active(&self, now_ms: u64) {
        let overflow = self.active_clients.len().saturating_sub(ACTIVE_CLIENTS_MAX);
        if overflow == 0 {
            return;
        }
        let mut entries: Vec<(String, u64)> = self
            .active_clients
            .iter()
            .map(|r| {
                let age = now_ms.saturating_sub(*r.value());
                (r.key().clone(), age)
            })
            .collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        for (key, _) in entries.into_iter().take(overflow) {
            self.active_clients.remove(&key);
        }
    }
}
