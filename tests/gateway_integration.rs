//! End-to-end test of the server shell with the store unreachable: every
//! request fails open, the health endpoint reports the store as degraded,
//! and the metrics endpoint exposes the protection families and its own
//! scrape limit. No Docker required.
//!
//! A single test function builds the full state because the Prometheus
//! recorder can only be installed once per process.

use atlas_shield::config::ShieldConfig;
use atlas_shield::server::{self, ShieldState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_gateway_fails_open_and_admin_plane_reports_it() {
    let mut config = ShieldConfig::default();
    // Nothing listens on this port: every decision lacks a store verdict.
    config.store.url = "redis://127.0.0.1:1".into();
    config.store.timeout_ms = 300;
    config.listen = format!("127.0.0.1:{}", free_port());
    config.admin_listen = format!("127.0.0.1:{}", free_port());
    config.validate().unwrap();

    let shutdown = Arc::new(Notify::new());
    let state = ShieldState::new(config, shutdown.clone()).await.unwrap();

    {
        let listen = state.config.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server::run_gateway_server(&listen, state, shutdown).await });
    }
    {
        let admin = state.config.admin_listen.clone();
        let state = state.clone();
        tokio::spawn(async move { server::run_admin_server(&admin, state).await });
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let gateway = format!("http://{}", state.config.listen);
    let admin = format!("http://{}", state.config.admin_listen);
    let client = reqwest::Client::new();

    // Health: the api is up, the store is not.
    let health: serde_json::Value = client
        .get(format!("{}/health", admin))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["services"]["api"], "healthy");
    assert_eq!(health["services"]["redis"], "degraded");
    assert!(health["timestamp"].as_str().unwrap().contains('T'));

    // Three requests with no store verdict: all admitted (fail-open), with
    // optimistic quota headers.
    for _ in 0..3 {
        let resp = client.get(format!("{}/anything", gateway)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let headers = resp.headers();
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "100");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "100");
        assert!(headers.get("x-ratelimit-reset").is_some());
    }

    // Metrics: fail-open is visible on the health axis, not the workload
    // axis.
    let metrics_body = client
        .get(format!("{}/metrics", admin))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics_body.contains("atlas_fail_open_events_total 3"));
    assert!(metrics_body.contains("atlas_redis_errors_total 3"));
    assert!(metrics_body.contains("atlas_requests_allowed_total 3"));
    assert!(metrics_body.contains("atlas_requests_blocked_total 0"));
    assert!(metrics_body.contains("atlas_protection_rate 0"));
    assert!(metrics_body.contains("atlas_system_health_score 0"));
    assert!(metrics_body.contains("# TYPE atlas_response_time_ms summary"));
    assert!(metrics_body.contains("atlas_response_time_ms{quantile=\"0.95\"}"));
    assert!(metrics_body.contains("atlas_active_clients 1"));

    // The exposition endpoint enforces its own local quota.
    let mut limited = 0;
    for _ in 0..60 {
        let resp = client
            .get(format!("{}/metrics", admin))
            .send()
            .await
            .unwrap();
        if resp.status() == 429 {
            limited += 1;
        }
    }
    assert!(limited > 0, "metrics endpoint must throttle rapid scrapes");
}
