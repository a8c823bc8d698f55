use crate::identity::Principal;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request context carried through the decision phases.
pub struct RequestContext {
    pub principal: Principal,
    pub method: String,
    pub path: String,
    pub start: Instant,
}

impl RequestContext {
    pub fn new(principal: Principal, method: String, path: String) -> Self {
        Self {
            principal,
            method,
            path,
            start: Instant::now(),
        }
    }

    /// Record the decision outcome and its latency in one place; returns the
    /// elapsed milliseconds so the caller can feed the quantile sketch.
    pub fn record_decision(&self, outcome: &'static str) -> f64 {
        let elapsed = self.start.elapsed();

        metrics::counter!(
            "atlas_http_requests_total",
            "outcome" => outcome,
            "method" => self.method.clone(),
        )
        .increment(1);

        metrics::histogram!(
            "atlas_decision_duration_seconds",
            "outcome" => outcome,
        )
        .record(elapsed.as_secs_f64());

        elapsed.as_secs_f64() * 1000.0
    }
}
