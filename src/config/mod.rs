pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl ShieldConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used so only `ATLAS_STORE_URL` is needed to start the gateway.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: ShieldConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            ShieldConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `ATLAS_*` environment variable overrides. These take precedence
    /// over file values so containerized deployments can reconfigure the
    /// gateway without shipping a config file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ATLAS_LISTEN") {
            self.listen = v;
        }
        if let Ok(v) = std::env::var("ATLAS_ADMIN_LISTEN") {
            self.admin_listen = v;
        }
        if let Ok(v) = std::env::var("ATLAS_ENVIRONMENT") {
            match v.as_str() {
                "production" => self.environment = Environment::Production,
                "development" => self.environment = Environment::Development,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("ATLAS_UPSTREAM_URL") {
            self.upstream_url = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = std::env::var("ATLAS_TRUST_PROXY") {
            self.trust_proxy = TrustProxyValue::Text(v);
        }
        if let Ok(v) = std::env::var("ATLAS_LATENCY_HISTORY_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                self.latency_history_size = n;
            }
        }

        // Limiter
        if let Ok(v) = std::env::var("ATLAS_CAPACITY") {
            if let Ok(n) = v.parse::<u64>() {
                self.limiter.capacity = n;
            }
        }
        if let Ok(v) = std::env::var("ATLAS_REFILL_RATE") {
            if let Ok(n) = v.parse::<u64>() {
                self.limiter.refill_rate = n;
            }
        }
        if let Ok(v) = std::env::var("ATLAS_COST") {
            if let Ok(n) = v.parse::<u64>() {
                self.limiter.cost = n;
            }
        }
        if let Ok(v) = std::env::var("ATLAS_KEY_PREFIX") {
            self.limiter.key_prefix = v;
        }

        // Store
        if let Ok(v) = std::env::var("ATLAS_STORE_URL") {
            self.store.url = v;
        }
        if let Ok(v) = std::env::var("ATLAS_STORE_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.store.timeout_ms = n;
            }
        }

        // Abuse
        if let Ok(v) = std::env::var("ATLAS_BAN_THRESHOLD") {
            if let Ok(n) = v.parse::<u32>() {
                self.abuse.ban_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("ATLAS_VIOLATION_WINDOW_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.abuse.violation_window_ms = n;
            }
        }
        if let Ok(v) = std::env::var("ATLAS_BAN_DURATION_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.abuse.ban_duration_ms = n;
            }
        }
    }

    /// Startup validation. Everything here is fatal: limiter and trust
    /// misconfiguration must never fall through to request time.
    pub fn validate(&self) -> Result<()> {
        if self.store.url.is_empty() {
            anyhow::bail!("store URL is required (store.url or ATLAS_STORE_URL)");
        }
        if self.limiter.capacity == 0 {
            anyhow::bail!("limiter capacity must be positive");
        }
        if self.limiter.refill_rate == 0 {
            anyhow::bail!("limiter refill_rate must be positive");
        }
        if self.limiter.cost == 0 {
            anyhow::bail!("limiter cost must be positive");
        }
        if self.limiter.capacity < self.limiter.cost {
            anyhow::bail!(
                "limiter capacity ({}) must be at least cost ({})",
                self.limiter.capacity,
                self.limiter.cost
            );
        }
        if self.latency_history_size == 0 {
            anyhow::bail!("latency_history_size must be positive");
        }
        if self.abuse.ban_threshold == 0 {
            anyhow::bail!("abuse ban_threshold must be positive");
        }
        if let Err(msg) = self.trust_proxy.resolve() {
            anyhow::bail!(msg);
        }
        if let Some(ref url) = self.upstream_url {
            url.parse::<http::Uri>()
                .map_err(|e| anyhow::anyhow!("invalid upstream_url {:?}: {}", url, e))?;
        }
        Ok(())
    }
}
