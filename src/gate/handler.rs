use crate::error::ShieldError;
use crate::gate::context::{BoxBody, RequestContext};
use crate::gate::response::{self, Denial, RateLimitInfo};
use crate::identity::{self, AuthSubject, ClientHello};
use crate::server::ShieldState;
use crate::shield::{audit, epoch_ms};
use crate::store::Verdict;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::warn;

/// Outcome of the admission phases, before the request touches the upstream.
enum Decision {
    Allow(RateLimitInfo),
    Deny(Denial),
}

/// Handle one inbound request through the admission lifecycle:
///
/// 1. IDENTIFY   — derive the principal (api key > subject > address)
/// 2. BAN GATE   — short-circuit banned principals, no store round trip
/// 3. BUCKET     — atomic refill-and-consume on the store (fail-open on error)
/// 4. ESCALATE   — count denials, install bans at the threshold
/// 5. RESPOND    — forward admitted requests, shape denials
///
/// The admission path never surfaces a 5xx: clients see the upstream's
/// response, a 429, or a 502 from the forwarding layer.
pub async fn handle_request(
    req: Request<Incoming>,
    state: ShieldState,
    peer: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let principal = {
        let hello = ClientHello {
            headers: req.headers(),
            query: req.uri().query(),
            subject: req
                .extensions()
                .get::<AuthSubject>()
                .map(|s| s.0.as_str()),
            peer: peer.ip(),
        };
        identity::identify(&hello, state.trust)
    };

    let ctx = RequestContext::new(
        principal,
        req.method().as_str().to_string(),
        req.uri().path().to_string(),
    );

    let decision = decide(&ctx, &state).await;

    match decision {
        Decision::Deny(denial) => Ok(response::denial_response(&denial)),
        Decision::Allow(info) => forward_admitted(req, &state, peer, &info).await,
    }
}

/// Phases 1–4. Infallible by construction: every store failure degrades to
/// an admission, and an unexpected error in the decision path is logged and
/// admitted rather than surfaced.
async fn decide(ctx: &RequestContext, state: &ShieldState) -> Decision {
    let shield = &state.shield;
    let client_id = ctx.principal.as_str();
    let now_ms = epoch_ms();

    shield.abuse.observe_client(client_id, now_ms);

    // Ban gate: a banned principal never refills and never reaches the
    // store, so a ban cannot be waited out one refill tick at a time.
    if let Some(ban_remaining_s) = shield.abuse.ban_state(client_id, now_ms) {
        shield.metrics.record_blocked_malicious();
        audit::banned_blocked(client_id, ban_remaining_s);
        let ms = ctx.record_decision("banned");
        shield.metrics.latency.record(ms);
        return Decision::Deny(Denial {
            info: RateLimitInfo {
                limit: state.engine.capacity(),
                remaining: 0,
                reset_epoch_s: now_ms / 1000 + ban_remaining_s,
            },
            retry_after_s: ban_remaining_s,
            ban_remaining_s: Some(ban_remaining_s),
            threat_detected: true,
        });
    }

    let verdict = state.engine.check_and_consume(&state.store, client_id).await;

    match verdict {
        Ok(Verdict {
            allowed: true,
            remaining,
            reset_epoch_s,
        }) => {
            metrics::counter!("atlas_store_round_trips_total", "result" => "ok").increment(1);
            shield.metrics.record_allowed();
            audit::allowed(client_id, remaining);
            let ms = ctx.record_decision("allowed");
            shield.metrics.latency.record(ms);
            Decision::Allow(RateLimitInfo {
                limit: state.engine.capacity(),
                remaining,
                reset_epoch_s,
            })
        }

        Ok(Verdict {
            allowed: false,
            remaining,
            reset_epoch_s,
        }) => {
            metrics::counter!("atlas_store_round_trips_total", "result" => "ok").increment(1);
            let now_ms = epoch_ms();
            let became_banned = shield.abuse.track_violation(client_id, now_ms);
            if became_banned {
                shield.metrics.record_blocked_malicious();
                shield.metrics.record_threat_neutralized();
                audit::malicious_client_detected(
                    client_id,
                    shield.abuse.violation_count(client_id),
                    state.config.abuse.ban_duration_ms / 1000,
                );
            } else {
                shield.metrics.record_blocked_standard();
            }

            let retry_after_s = reset_epoch_s.saturating_sub(now_ms / 1000).max(1);
            audit::blocked(client_id, remaining, retry_after_s);
            let ms = ctx.record_decision("blocked");
            shield.metrics.latency.record(ms);

            Decision::Deny(Denial {
                info: RateLimitInfo {
                    limit: state.engine.capacity(),
                    remaining,
                    reset_epoch_s,
                },
                retry_after_s,
                ban_remaining_s: None,
                threat_detected: became_banned,
            })
        }

        Err(e) => {
            metrics::counter!("atlas_store_round_trips_total", "result" => "error").increment(1);
            // A fail-open admission still counts as decided traffic so the
            // health score (not the protection rate) reflects the outage.
            shield.metrics.record_allowed();
            shield.metrics.record_fail_open();
            match &e {
                ShieldError::StoreUnavailable(_)
                | ShieldError::StoreTimeout
                | ShieldError::Script(_) => {
                    shield.metrics.record_redis_error();
                    audit::fail_open(client_id, &e.to_string());
                }
                // Anything else in the decision path is a bug, not an
                // outage; log it loudly but still admit.
                other => audit::decision_error(client_id, &other.to_string()),
            }
            let ms = ctx.record_decision("fail_open");
            shield.metrics.latency.record(ms);

            // No verdict: admit with optimistic headers so clients are not
            // told to back off during a store outage.
            Decision::Allow(RateLimitInfo {
                limit: state.engine.capacity(),
                remaining: state.engine.capacity(),
                reset_epoch_s: epoch_ms() / 1000,
            })
        }
    }
}

/// Phase 5 for admitted requests: forward upstream (or answer locally) and
/// stamp the quota headers on whatever goes back out.
async fn forward_admitted(
    req: Request<Incoming>,
    state: &ShieldState,
    peer: SocketAddr,
    info: &RateLimitInfo,
) -> Result<Response<BoxBody>, hyper::Error> {
    let Some(ref upstream) = state.upstream else {
        return Ok(response::echo_response(info));
    };

    let start = Instant::now();
    match upstream.forward(req, peer).await {
        Ok(mut resp) => {
            metrics::histogram!("atlas_upstream_duration_seconds")
                .record(start.elapsed().as_secs_f64());
            response::apply_rate_limit_headers(resp.headers_mut(), info);
            Ok(resp)
        }
        Err(e) => {
            warn!("gate: upstream forward failed, error={}", e);
            Ok(response::upstream_error_response(info))
        }
    }
}
