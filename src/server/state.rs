use crate::config::{ShieldConfig, TrustProxy};
use crate::gate::upstream::UpstreamForwarder;
use crate::metrics::Metrics;
use crate::server::admin::ScrapeGuard;
use crate::shield::Shield;
use crate::store::{BucketScript, StoreClient};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

/// Shared gateway state, cheaply cloneable.
///
/// One `Shield` instance owns all in-process mutable state; the store client
/// is the only path to shared bucket state. Everything is built once at
/// bootstrap; construction failures are startup failures.
#[derive(Clone)]
pub struct ShieldState {
    pub config: Arc<ShieldConfig>,
    pub trust: TrustProxy,
    pub shield: Arc<Shield>,
    pub store: Arc<StoreClient>,
    pub engine: Arc<BucketScript>,
    pub upstream: Option<Arc<UpstreamForwarder>>,
    pub metrics: Metrics,
    pub scrape_guard: Arc<ScrapeGuard>,
}

impl ShieldState {
    pub async fn new(config: ShieldConfig, shutdown: Arc<Notify>) -> Result<Self> {
        // validate() ran at load time; resolving again here cannot fail.
        let trust = config
            .trust_proxy
            .resolve()
            .map_err(|e| anyhow::anyhow!(e))?;

        let metrics = Metrics::install();
        let shield = Arc::new(Shield::new(&config));

        let store = StoreClient::connect(
            &config.store.url,
            Duration::from_millis(config.store.timeout_ms),
            shutdown,
        )
        .await?;

        let engine = Arc::new(BucketScript::new(&config.limiter));

        let upstream = match config.upstream_url {
            Some(ref url) => {
                let forwarder = UpstreamForwarder::new(url)?;
                info!("gate: forwarding admitted requests, upstream={}", url);
                Some(Arc::new(forwarder))
            }
            None => {
                info!("gate: no upstream configured, answering admitted requests locally");
                None
            }
        };

        Ok(Self {
            config: Arc::new(config),
            trust,
            shield,
            store,
            engine,
            upstream,
            metrics,
            scrape_guard: Arc::new(ScrapeGuard::new()),
        })
    }
}
