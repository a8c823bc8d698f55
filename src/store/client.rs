use crate::error::ShieldError;
use crate::shield::audit;
use arc_swap::ArcSwapOption;
use redis::aio::MultiplexedConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Reconnect backoff: `min(attempt × 1 s, 10 s)`, up to 60 attempts
/// (roughly ten minutes). After exhaustion the connection is abandoned and
/// the gateway keeps failing open until the process is restarted.
const RECONNECT_MAX_ATTEMPTS: u32 = 60;
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Shared key-value store client.
///
/// The live connection is held in an `ArcSwapOption` so the request hot path
/// reads it lock-free; a failed command swaps it out and kicks off a
/// single-flight background reconnect loop. While no connection is present
/// every decision fails open; the store is protective, not business-critical.
pub struct StoreClient {
    client: redis::Client,
    conn: ArcSwapOption<MultiplexedConnection>,
    reconnecting: AtomicBool,
    timeout: Duration,
    shutdown: Arc<Notify>,
}

impl StoreClient {
    /// Build the client and attempt an initial connection.
    ///
    /// A malformed URL is a fatal configuration error. An unreachable store
    /// is not: the gateway starts in degraded (fail-open) mode and the
    /// reconnect loop takes over.
    pub async fn connect(
        url: &str,
        timeout: Duration,
        shutdown: Arc<Notify>,
    ) -> Result<Arc<Self>, ShieldError> {
        let client = redis::Client::open(url)
            .map_err(|e| ShieldError::Config(format!("invalid store URL: {}", e)))?;

        let store = Arc::new(Self {
            client,
            conn: ArcSwapOption::empty(),
            reconnecting: AtomicBool::new(false),
            timeout,
            shutdown,
        });

        match store.try_connect().await {
            Ok(conn) => {
                store.conn.store(Some(Arc::new(conn)));
                audit::redis_connected();
            }
            Err(e) => {
                warn!("store: initial connection failed, starting degraded, error={}", e);
                store.spawn_reconnect();
            }
        }

        Ok(store)
    }

    pub fn command_timeout(&self) -> Duration {
        self.timeout
    }

    /// Cheap clone of the multiplexed connection, if one is live.
    pub fn connection(&self) -> Option<MultiplexedConnection> {
        self.conn.load_full().map(|c| (*c).clone())
    }

    pub fn is_connected(&self) -> bool {
        self.conn.load().is_some()
    }

    /// Liveness probe for the health endpoint.
    pub async fn ping(self: &Arc<Self>) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        let fut = async {
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(pong)
        };
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                self.report_failure(&e.to_string());
                false
            }
            Err(_) => {
                self.report_failure("ping timed out");
                false
            }
        }
    }

    /// Record a failed store interaction: drop the connection so subsequent
    /// requests fail open immediately instead of each timing out, and start
    /// the reconnect loop if one is not already running.
    pub fn report_failure(self: &Arc<Self>, error: &str) {
        audit::redis_error(error);
        if self.conn.swap(None).is_some() {
            audit::redis_connection_closed();
        }
        self.spawn_reconnect();
    }

    async fn try_connect(&self) -> Result<MultiplexedConnection, ShieldError> {
        match tokio::time::timeout(self.timeout, self.client.get_multiplexed_async_connection())
            .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(ShieldError::StoreUnavailable(e.to_string())),
            Err(_) => Err(ShieldError::StoreTimeout),
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        // Single-flight: the flag stays set once the attempt budget is
        // exhausted, so an abandoned store is never retried until restart.
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move { store.reconnect_loop().await });
    }

    async fn reconnect_loop(self: Arc<Self>) {
        for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
            let backoff = Duration::from_secs(attempt as u64).min(RECONNECT_BACKOFF_CAP);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.notified() => return,
            }

            match self.try_connect().await {
                Ok(conn) => {
                    self.conn.store(Some(Arc::new(conn)));
                    self.reconnecting.store(false, Ordering::SeqCst);
                    metrics::counter!("atlas_store_reconnects_total", "result" => "success")
                        .increment(1);
                    audit::redis_connected();
                    info!("store: reconnected after {} attempt(s)", attempt);
                    return;
                }
                Err(e) => {
                    metrics::counter!("atlas_store_reconnects_total", "result" => "error")
                        .increment(1);
                    warn!(
                        "store: reconnect attempt {}/{} failed, error={}",
                        attempt, RECONNECT_MAX_ATTEMPTS, e
                    );
                }
            }
        }

        warn!(
            "store: giving up after {} reconnect attempts, failing open until restart",
            RECONNECT_MAX_ATTEMPTS
        );
    }
}
