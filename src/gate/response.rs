use crate::gate::context::{full_body, BoxBody};
use http::{HeaderValue, StatusCode};
use hyper::Response;

/// The quota facts every response carries, allow or deny.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset_epoch_s: u64,
}

/// Everything needed to shape a 429.
#[derive(Debug, Clone, Copy)]
pub struct Denial {
    pub info: RateLimitInfo,
    pub retry_after_s: u64,
    /// Set only for ban short-circuits: seconds until the ban lifts.
    pub ban_remaining_s: Option<u64>,
    pub threat_detected: bool,
}

fn num_header(value: u64) -> HeaderValue {
    let mut buf = itoa::Buffer::new();
    HeaderValue::from_str(buf.format(value)).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// Attach the standard rate-limit headers. Applied to every response that
/// leaves the gateway, including forwarded upstream responses.
pub fn apply_rate_limit_headers(headers: &mut http::HeaderMap, info: &RateLimitInfo) {
    headers.insert("x-ratelimit-limit", num_header(info.limit));
    headers.insert("x-ratelimit-remaining", num_header(info.remaining));
    headers.insert("x-ratelimit-reset", num_header(info.reset_epoch_s));
}

/// Build the 429 denial response: retry hints, ban hints when applicable,
/// and the JSON body clients key off of.
pub fn denial_response(denial: &Denial) -> Response<BoxBody> {
    let banned = denial.ban_remaining_s.is_some();
    let message = if banned {
        "Temporarily banned due to repeated rate limit violations".to_string()
    } else {
        format!(
            "Rate limit exceeded, retry in {} second(s)",
            denial.retry_after_s
        )
    };

    let body = serde_json::json!({
        "error": "Too Many Requests",
        "message": message,
        "banned": banned,
        "retry_after_seconds": denial.retry_after_s,
        "limit": denial.info.limit,
        "remaining": denial.info.remaining,
        "reset": denial.info.reset_epoch_s,
        "threat_detected": denial.threat_detected,
    });

    let mut builder = Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("content-type", "application/json")
        .header("retry-after", num_header(denial.retry_after_s));

    if let Some(ban_remaining) = denial.ban_remaining_s {
        builder = builder
            .header("x-ban-remaining", num_header(ban_remaining))
            .header("x-threat-level", HeaderValue::from_static("BANNED"));
    }

    let mut resp = builder
        .body(full_body(body.to_string()))
        .unwrap_or_else(|_| Response::new(full_body("")));
    apply_rate_limit_headers(resp.headers_mut(), &denial.info);
    resp
}

/// Local echo mode: no upstream configured, answer admitted requests
/// directly. Keeps development and the test harness self-contained.
pub fn echo_response(info: &RateLimitInfo) -> Response<BoxBody> {
    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(full_body(r#"{"status":"ok"}"#))
        .unwrap_or_else(|_| Response::new(full_body("")));
    apply_rate_limit_headers(resp.headers_mut(), info);
    resp
}

/// The upstream failed after the request was admitted: a 502 from the
/// forwarding layer, never from the limiter itself.
pub fn upstream_error_response(info: &RateLimitInfo) -> Response<BoxBody> {
    let mut resp = Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header("content-type", "application/json")
        .body(full_body(r#"{"error":"bad gateway"}"#))
        .unwrap_or_else(|_| Response::new(full_body("")));
    apply_rate_limit_headers(resp.headers_mut(), info);
    resp
}
