use super::types::*;
use super::ShieldConfig;

fn base_config() -> ShieldConfig {
    let mut cfg = ShieldConfig::default();
    cfg.store.url = "redis://127.0.0.1:6379".into();
    cfg
}

#[test]
fn test_load_toml_config() {
    let toml = r#"
        listen = "0.0.0.0:8080"
        environment = "production"
        trust_proxy = 2

        [limiter]
        capacity = 50
        refill_rate = 5
        cost = 1
        key_prefix = "shield:"

        [store]
        url = "redis://127.0.0.1:6379"
        timeout_ms = 1500

        [abuse]
        ban_threshold = 10
        violation_window_ms = 60000
        ban_duration_ms = 600000
    "#;
    let tmp = std::env::temp_dir().join("atlas_shield_test_config.toml");
    std::fs::write(&tmp, toml).unwrap();
    let cfg = ShieldConfig::load(&tmp).unwrap();
    assert_eq!(cfg.limiter.capacity, 50);
    assert_eq!(cfg.limiter.refill_rate, 5);
    assert_eq!(cfg.store.timeout_ms, 1500);
    assert_eq!(cfg.environment, Environment::Production);
    assert_eq!(cfg.trust_proxy.resolve().unwrap(), TrustProxy::Hops(2));
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "listen": "127.0.0.1:9000",
        "trust_proxy": true,
        "limiter": { "capacity": 200 },
        "store": { "url": "rediss://cache.internal:6380" }
    }"#;
    let tmp = std::env::temp_dir().join("atlas_shield_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = ShieldConfig::load(&tmp).unwrap();
    assert_eq!(cfg.listen, "127.0.0.1:9000");
    assert_eq!(cfg.limiter.capacity, 200);
    assert_eq!(cfg.limiter.cost, 1);
    assert_eq!(cfg.store.url, "rediss://cache.internal:6380");
    assert_eq!(cfg.trust_proxy.resolve().unwrap(), TrustProxy::All);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_validate_missing_store_url_fails() {
    let cfg = ShieldConfig::default();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_zero_capacity_fails() {
    let mut cfg = base_config();
    cfg.limiter.capacity = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_zero_refill_rate_fails() {
    let mut cfg = base_config();
    cfg.limiter.refill_rate = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_cost_exceeding_capacity_fails() {
    let mut cfg = base_config();
    cfg.limiter.capacity = 2;
    cfg.limiter.cost = 5;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_accepts_defaults_with_store_url() {
    assert!(base_config().validate().is_ok());
}

#[test]
fn test_validate_bad_upstream_url_fails() {
    let mut cfg = base_config();
    cfg.upstream_url = Some("not a url".into());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_trust_proxy_bool_values() {
    assert_eq!(TrustProxyValue::Flag(false).resolve().unwrap(), TrustProxy::Off);
    assert_eq!(TrustProxyValue::Flag(true).resolve().unwrap(), TrustProxy::All);
}

#[test]
fn test_trust_proxy_hop_counts() {
    assert_eq!(TrustProxyValue::Hops(1).resolve().unwrap(), TrustProxy::Hops(1));
    assert_eq!(TrustProxyValue::Hops(3).resolve().unwrap(), TrustProxy::Hops(3));
    assert!(TrustProxyValue::Hops(0).resolve().is_err());
    assert!(TrustProxyValue::Hops(-1).resolve().is_err());
}

#[test]
fn test_trust_proxy_text_values() {
    assert_eq!(
        TrustProxyValue::Text("true".into()).resolve().unwrap(),
        TrustProxy::All
    );
    assert_eq!(
        TrustProxyValue::Text("false".into()).resolve().unwrap(),
        TrustProxy::Off
    );
    assert_eq!(
        TrustProxyValue::Text("2".into()).resolve().unwrap(),
        TrustProxy::Hops(2)
    );
}

#[test]
fn test_trust_proxy_garbage_is_startup_error() {
    // The original JS accepted anything and silently fell back to "false".
    // That silent degradation is a misconfiguration trap; here it is fatal.
    let mut cfg = base_config();
    cfg.trust_proxy = TrustProxyValue::Text("yes please".into());
    assert!(cfg.validate().is_err());
}
