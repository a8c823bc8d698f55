use crate::config::LimiterConfig;
use crate::error::ShieldError;
use crate::store::StoreClient;
use std::sync::Arc;

/// Atomic refill-and-consume, executed server-side so that concurrent
/// replicas serialize on the store rather than racing each other.
///
/// Uses the store's own clock (`TIME`); caller clocks drift across replicas
/// and would double-refill or double-charge. On denial only `last_refill` is
/// persisted: refreshing the timestamp without crediting tokens prevents a
/// client that is being steadily denied from accumulating a burst for later.
/// TTL is adaptive: warm principals (more than half a bucket left) stay
/// resident longer, drained ones age out sooner.
pub const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])

redis.replicate_commands()
local time = redis.call('TIME')
local now = tonumber(time[1])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1])
local last_refill = tonumber(bucket[2])

if tokens == nil then
    tokens = capacity
    last_refill = now
end

local elapsed = math.max(0, now - last_refill)
tokens = math.min(capacity, tokens + elapsed * refill_rate)

if tokens >= cost then
    tokens = tokens - cost
    redis.call('HMSET', key, 'tokens', tokens, 'last_refill', now)
    if tokens > capacity / 2 then
        redis.call('EXPIRE', key, 7200)
    else
        redis.call('EXPIRE', key, 3600)
    end
    return {1, math.floor(tokens), now}
else
    redis.call('HSET', key, 'last_refill', now)
    redis.call('EXPIRE', key, 3600)
    local wait = math.ceil((cost - tokens) / refill_rate)
    return {0, math.floor(tokens), now + wait}
end
"#;

/// The script's `(allowed, remaining, reset)` return tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    /// Whole tokens left after the decision (floored; `0` on denial of an
    /// empty bucket).
    pub remaining: u64,
    /// Store-clock epoch seconds: decision time on admission, next-token
    /// time on denial.
    pub reset_epoch_s: u64,
}

impl Verdict {
    fn from_reply(values: &[i64]) -> Option<Self> {
        if values.len() < 3 {
            return None;
        }
        Some(Verdict {
            allowed: values[0] == 1,
            remaining: values[1].max(0) as u64,
            reset_epoch_s: values[2].max(0) as u64,
        })
    }
}

/// Token-bucket engine: one script invocation per decision.
///
/// `redis::Script` addresses the script by its content SHA1 (EVALSHA) and
/// transparently re-registers the body and retries once on NOSCRIPT, which
/// covers store restarts and script-cache eviction.
pub struct BucketScript {
    script: redis::Script,
    key_prefix: String,
    capacity: u64,
    refill_rate: u64,
    cost: u64,
}

impl BucketScript {
    pub fn new(limiter: &LimiterConfig) -> Self {
        Self {
            script: redis::Script::new(TOKEN_BUCKET_SCRIPT),
            key_prefix: limiter.key_prefix.clone(),
            capacity: limiter.capacity,
            refill_rate: limiter.refill_rate,
            cost: limiter.cost,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn bucket_key(&self, principal: &str) -> String {
        format!("{}{}", self.key_prefix, principal)
    }

    /// Execute the atomic decision for one principal. Store failures surface
    /// as errors; the caller owns the fail-open policy.
    pub async fn check_and_consume(
        &self,
        store: &Arc<StoreClient>,
        principal: &str,
    ) -> Result<Verdict, ShieldError> {
        let mut conn = store
            .connection()
            .ok_or_else(|| ShieldError::StoreUnavailable("no live connection".into()))?;

        let key = self.bucket_key(principal);
        let invocation_result = tokio::time::timeout(store.command_timeout(), async {
            let values: Vec<i64> = self
                .script
                .key(&key)
                .arg(self.capacity)
                .arg(self.refill_rate)
                .arg(self.cost)
                .invoke_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(values)
        })
        .await;

        let values = match invocation_result {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => {
                let msg = e.to_string();
                store.report_failure(&msg);
                return Err(if e.is_io_error() {
                    ShieldError::StoreUnavailable(msg)
                } else {
                    ShieldError::Script(msg)
                });
            }
            Err(_) => {
                store.report_failure("bucket script timed out");
                return Err(ShieldError::StoreTimeout);
            }
        };

        Verdict::from_reply(&values)
            .ok_or_else(|| ShieldError::Script(format!("malformed script reply: {:?}", values)))
    }
}
