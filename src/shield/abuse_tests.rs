use super::abuse::AbuseControl;
use crate::config::AbuseConfig;

fn control() -> AbuseControl {
    AbuseControl::new(&AbuseConfig {
        ban_threshold: 10,
        violation_window_ms: 60_000,
        ban_duration_ms: 600_000,
    })
}

#[test]
fn test_first_violation_opens_window() {
    let abuse = control();
    assert!(!abuse.track_violation("ip:1.1.1.1", 1_000));
    assert_eq!(abuse.violation_count("ip:1.1.1.1"), 1);
    assert!(abuse.ban_state("ip:1.1.1.1", 1_000).is_none());
}

#[test]
fn test_threshold_within_window_installs_ban() {
    let abuse = control();
    let mut banned = false;
    for i in 0..10 {
        banned = abuse.track_violation("ip:2.2.2.2", 1_000 + i * 100);
    }
    assert!(banned, "10th violation inside the window must ban");
    // 600s ban from the 10th violation at t=1900ms.
    assert_eq!(abuse.ban_state("ip:2.2.2.2", 1_900), Some(600));
    assert_eq!(abuse.banned_count(1_900), 1);
}

#[test]
fn test_threshold_crossing_reports_exactly_once() {
    let abuse = control();
    let mut ban_events = 0;
    for i in 0..15 {
        if abuse.track_violation("ip:2.2.2.2", 1_000 + i) {
            ban_events += 1;
        }
    }
    assert_eq!(ban_events, 1);
}

#[test]
fn test_stale_window_resets_count() {
    let abuse = control();
    for i in 0..9 {
        abuse.track_violation("ip:3.3.3.3", 1_000 + i);
    }
    // The next denial lands after the 60s window: fresh window of count 1.
    assert!(!abuse.track_violation("ip:3.3.3.3", 1_000 + 60_000));
    assert_eq!(abuse.violation_count("ip:3.3.3.3"), 1);
}

#[test]
fn test_ban_expiry_is_strict_less_than() {
    let abuse = control();
    for i in 0..10 {
        abuse.track_violation("ip:4.4.4.4", i);
    }
    let expires_at = 9 + 600_000;
    assert!(abuse.ban_state("ip:4.4.4.4", expires_at - 1).is_some());
    // Arriving exactly at expiry is admitted.
    assert!(abuse.ban_state("ip:4.4.4.4", expires_at).is_none());
}

#[test]
fn test_ban_expiry_purges_violation_record() {
    let abuse = control();
    for i in 0..10 {
        abuse.track_violation("ip:5.5.5.5", i);
    }
    assert!(abuse.ban_state("ip:5.5.5.5", 700_000).is_none());
    assert_eq!(abuse.violation_count("ip:5.5.5.5"), 0);
}

#[test]
fn test_retry_after_rounds_up() {
    let abuse = control();
    for i in 0..10 {
        abuse.track_violation("ip:6.6.6.6", i);
    }
    // 9 + 600_000 expiry; 500ms before expiry still reports a whole second.
    assert_eq!(abuse.ban_state("ip:6.6.6.6", 9 + 600_000 - 500), Some(1));
}

#[test]
fn test_sweep_evicts_expired_bans_and_stale_windows() {
    let abuse = control();
    for i in 0..10 {
        abuse.track_violation("ip:7.7.7.7", i);
    }
    abuse.track_violation("ip:8.8.8.8", 0);

    // Past ban expiry and past 2x window for the lone violation.
    abuse.sweep(1_000_000);
    assert_eq!(abuse.banned_count(1_000_000), 0);
    assert_eq!(abuse.violation_count("ip:7.7.7.7"), 0);
    assert_eq!(abuse.violation_count("ip:8.8.8.8"), 0);
}

#[test]
fn test_sweep_keeps_live_state() {
    let abuse = control();
    for i in 0..10 {
        abuse.track_violation("ip:9.9.9.9", i);
    }
    abuse.sweep(50_000);
    assert_eq!(abuse.banned_count(50_000), 1);
    assert!(abuse.ban_state("ip:9.9.9.9", 50_000).is_some());
}

#[test]
fn test_active_clients_gauge() {
    let abuse = control();
    abuse.observe_client("ip:1.1.1.1", 0);
    abuse.observe_client("ip:1.1.1.1", 5);
    abuse.observe_client("user:alice", 5);
    assert_eq!(abuse.active_count(), 2);
}

#[test]
fn test_separate_principals_do_not_share_windows() {
    let abuse = control();
    for i in 0..9 {
        abuse.track_violation("ip:10.0.0.1", i);
        abuse.track_violation("ip:10.0.0.2", i);
    }
    assert_eq!(abuse.banned_count(100), 0);
    assert!(abuse.track_violation("ip:10.0.0.1", 50));
    assert_eq!(abuse.banned_count(100), 1);
    assert!(abuse.ban_state("ip:10.0.0.2", 100).is_none());
}
