use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
///
/// Limiter parameters, store connection, and abuse thresholds live in their
/// own sections; server-shell settings sit at the top level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldConfig {
    /// Gateway listen address.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Admin listen address (health / metrics).
    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,

    /// Controls log formatting (JSON vs colored human lines) and audit verbosity.
    #[serde(default)]
    pub environment: Environment,

    /// Where admitted requests are forwarded. When unset the gateway answers
    /// admitted requests itself with a small JSON body (local echo mode).
    #[serde(default)]
    pub upstream_url: Option<String>,

    /// Proxy-trust policy for client address resolution: `false` (direct peer
    /// only), a positive hop count, or `true` (trust any forwarding header).
    /// Accepts a bool, an integer, or the equivalent string. Anything else is
    /// a startup error.
    #[serde(default)]
    pub trust_proxy: TrustProxyValue,

    /// Samples retained by the decision-latency sketch.
    #[serde(default = "default_latency_history_size")]
    pub latency_history_size: usize,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub abuse: AbuseConfig,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_listen: default_admin_listen(),
            environment: Environment::default(),
            upstream_url: None,
            trust_proxy: TrustProxyValue::default(),
            latency_history_size: default_latency_history_size(),
            limiter: LimiterConfig::default(),
            store: StoreConfig::default(),
            abuse: AbuseConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_listen() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_latency_history_size() -> usize {
    1000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Token-bucket parameters shared by every principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum tokens a bucket can hold.
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Tokens accrued per second of inactivity.
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u64,

    /// Tokens consumed per admitted request.
    #[serde(default = "default_cost")]
    pub cost: u64,

    /// Store key prefix for bucket hashes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
            cost: default_cost(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_capacity() -> u64 {
    100
}

fn default_refill_rate() -> u64 {
    1
}

fn default_cost() -> u64 {
    1
}

fn default_key_prefix() -> String {
    "shield:".to_string()
}

/// Shared key-value store connection. `rediss://` selects TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection string. Required; the gateway refuses to start without it.
    #[serde(default)]
    pub url: String,

    /// Connect and per-command timeout, milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_store_timeout_ms() -> u64 {
    2000
}

/// Violation-escalation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseConfig {
    /// Denials within the window before a principal is banned.
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold: u32,

    /// Sliding violation window, milliseconds.
    #[serde(default = "default_violation_window_ms")]
    pub violation_window_ms: u64,

    /// Ban lifetime, milliseconds.
    #[serde(default = "default_ban_duration_ms")]
    pub ban_duration_ms: u64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            ban_threshold: default_ban_threshold(),
            violation_window_ms: default_violation_window_ms(),
            ban_duration_ms: default_ban_duration_ms(),
        }
    }
}

fn default_ban_threshold() -> u32 {
    10
}

fn default_violation_window_ms() -> u64 {
    60_000
}

fn default_ban_duration_ms() -> u64 {
    600_000
}

/// Raw `trust_proxy` value as it appears in the config file.
///
/// TOML and JSON users write a bool or an integer; environment overrides
/// arrive as strings. Resolution to a [`TrustProxy`] policy happens at
/// validation time so malformed values fail startup instead of silently
/// degrading to "no proxy".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrustProxyValue {
    Flag(bool),
    Hops(i64),
    Text(String),
}

impl Default for TrustProxyValue {
    fn default() -> Self {
        TrustProxyValue::Flag(false)
    }
}

/// Resolved proxy-trust policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustProxy {
    /// Ignore forwarding headers entirely; use the TCP peer address.
    Off,
    /// Trust the rightmost `n` hops of the forwarding chain.
    Hops(u32),
    /// Trust any forwarding header (leftmost entry wins).
    All,
}

impl TrustProxyValue {
    pub fn resolve(&self) -> Result<TrustProxy, String> {
        match self {
            TrustProxyValue::Flag(true) => Ok(TrustProxy::All),
            TrustProxyValue::Flag(false) => Ok(TrustProxy::Off),
            TrustProxyValue::Hops(n) if *n > 0 => Ok(TrustProxy::Hops(*n as u32)),
            TrustProxyValue::Hops(n) => Err(format!("trust_proxy hop count must be positive, got {}", n)),
            TrustProxyValue::Text(s) => match s.trim() {
                "true" => Ok(TrustProxy::All),
                "false" => Ok(TrustProxy::Off),
                other => match other.parse::<i64>() {
                    Ok(n) if n > 0 => Ok(TrustProxy::Hops(n as u32)),
                    Ok(n) => Err(format!("trust_proxy hop count must be positive, got {}", n)),
                    Err(_) => Err(format!(
                        "trust_proxy must be true, false, or a positive hop count, got {:?}",
                        other
                    )),
                },
            },
        }
    }
}
