//! Structured audit events for every admission decision.
//!
//! Events go through `tracing`: JSON lines in production, colored
//! human-readable lines in development (the subscriber decides). Decision
//! events carry `event_type`, `client_id`, `action`, and `remaining_tokens`;
//! client identifiers are principals, never raw API keys.

use tracing::{error, info, warn};

pub fn allowed(client_id: &str, remaining: u64) {
    info!(
        event_type = "rate_limit_allowed",
        client_id,
        action = "ALLOW",
        remaining_tokens = remaining,
        "request admitted"
    );
}

pub fn blocked(client_id: &str, remaining: u64, retry_after_s: u64) {
    warn!(
        event_type = "rate_limit_blocked",
        client_id,
        action = "DENY",
        remaining_tokens = remaining,
        retry_after_seconds = retry_after_s,
        "request denied, quota exhausted"
    );
}

pub fn banned_blocked(client_id: &str, ban_remaining_s: u64) {
    warn!(
        event_type = "banned_request_blocked",
        client_id,
        action = "DENY",
        remaining_tokens = 0u64,
        ban_remaining_seconds = ban_remaining_s,
        "request denied, client is banned"
    );
}

/// The degradation is intentional, so this is WARN, not ERROR.
pub fn fail_open(client_id: &str, reason: &str) {
    warn!(
        event_type = "rate_limit_fail_open",
        client_id,
        action = "ALLOW",
        reason,
        "store verdict unavailable, admitting"
    );
}

pub fn decision_error(client_id: &str, error: &str) {
    error!(
        event_type = "rate_limit_error",
        client_id,
        action = "ALLOW (fail-open)",
        error,
        "unexpected error in admission path, admitting"
    );
}

pub fn malicious_client_detected(client_id: &str, violations: u32, ban_duration_s: u64) {
    warn!(
        event_type = "malicious_client_detected",
        client_id,
        violations,
        ban_duration_seconds = ban_duration_s,
        "violation threshold crossed, client banned"
    );
}

pub fn server_started(listen: &str, admin_listen: &str) {
    info!(
        event_type = "server_started",
        listen, admin_listen, "gateway started"
    );
}

pub fn redis_connected() {
    info!(event_type = "redis_connected", "store connection established");
}

pub fn redis_error(error: &str) {
    error!(event_type = "redis_error", error, "store command failed");
}

pub fn redis_connection_closed() {
    warn!(event_type = "redis_connection_closed", "store connection lost");
}
