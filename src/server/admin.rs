use crate::gate::context::{full_body, BoxBody};
use crate::server::ShieldState;
use crate::shield::epoch_ms;
use hyper::body::Incoming;
use hyper::{Request, Response};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The metrics endpoint's own quota: 50 requests per 10 seconds, enforced by
/// a process-local bucket. The admin plane must not depend on the store, and
/// an unthrottled exposition endpoint is an enumeration-DoS target.
const SCRAPE_CAPACITY: f64 = 50.0;
const SCRAPE_REFILL_PER_SEC: f64 = 5.0;

/// Process-local token bucket guarding `/metrics`.
pub struct ScrapeGuard {
    inner: Mutex<GuardInner>,
}

struct GuardInner {
    tokens: f64,
    last_refill: Instant,
}

impl ScrapeGuard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GuardInner {
                tokens: SCRAPE_CAPACITY,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;

        let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
        guard.tokens = (guard.tokens + elapsed * SCRAPE_REFILL_PER_SEC).min(SCRAPE_CAPACITY);
        guard.last_refill = now;

        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for ScrapeGuard {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn handle_admin(
    req: Request<Incoming>,
    state: ShieldState,
) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => {
            let redis = if state.store.ping().await {
                "healthy"
            } else {
                "degraded"
            };
            let body = serde_json::json!({
                "status": "ok",
                "services": { "api": "healthy", "redis": redis },
                "timestamp": humantime::format_rfc3339_seconds(std::time::SystemTime::now())
                    .to_string(),
            });
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(body.to_string()))
                .unwrap())
        }

        "/metrics" => {
            if !state.scrape_guard.try_acquire().await {
                metrics::counter!("atlas_metrics_scrapes_total", "outcome" => "limited")
                    .increment(1);
                return Ok(Response::builder()
                    .status(429)
                    .header("retry-after", "1")
                    .body(full_body("scrape rate exceeded\n"))
                    .unwrap());
            }
            metrics::counter!("atlas_metrics_scrapes_total", "outcome" => "ok").increment(1);

            let mut body = state.metrics.render();
            body.push_str(&state.shield.render_metrics(epoch_ms()));
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scrape_guard_allows_burst_then_limits() {
        let guard = ScrapeGuard::new();
        let mut allowed = 0;
        for _ in 0..60 {
            if guard.try_acquire().await {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_guard_refills_over_time() {
        let guard = ScrapeGuard::new();
        for _ in 0..50 {
            assert!(guard.try_acquire().await);
        }
        assert!(!guard.try_acquire().await);

        // 5 tokens/s: after 2 virtual seconds, ~10 scrapes fit again.
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        let mut allowed = 0;
        for _ in 0..20 {
            if guard.try_acquire().await {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }
}
