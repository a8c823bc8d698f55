use crate::config::{Environment, ShieldConfig};
use crate::server::{self, ShieldState};
use crate::shield::{self, audit};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`. Listen addresses given on the
/// command line override the config file.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: Option<String>,
    pub admin_listen: Option<String>,
}

/// Gateway lifecycle: load config → init logging → build state → start
/// background loops → serve → drain on signal.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    // Configuration errors exit non-zero before anything is listening.
    let mut config = ShieldConfig::load(&args.config_path)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(admin_listen) = args.admin_listen {
        config.admin_listen = admin_listen;
    }

    init_tracing(config.environment);
    tracing::info!(
        "config: loaded, capacity={}, refill_rate={}/s, cost={}, environment={:?}",
        config.limiter.capacity,
        config.limiter.refill_rate,
        config.limiter.cost,
        config.environment,
    );

    let shutdown = Arc::new(Notify::new());
    let state = ShieldState::new(config, shutdown.clone()).await?;

    audit::server_started(&state.config.listen, &state.config.admin_listen);

    start_sweeper(&state, &shutdown);
    start_admin_server(&state);

    let gateway_handle = tokio::spawn({
        let listen = state.config.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_gateway_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    // Wait for the gateway to finish draining.
    match gateway_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("server: gateway error: {}", e),
        Err(e) => tracing::error!("server: gateway task error: {}", e),
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

/// Production logs JSON lines through a non-blocking writer; development
/// logs colored human-readable lines. Audit events carry their structured
/// fields either way.
fn init_tracing(environment: Environment) {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    if environment.is_production() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(false)
                    .json(),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(true)
                    .with_target(false)
                    .compact(),
            )
            .init();
    }

    std::mem::forget(_guard);
}

// ---------------------------------------------------------------------------
// Loop owners: each function spawns a task with the interval loop. The
// shield module only provides single-shot operations.
// ---------------------------------------------------------------------------

/// Sleep for `duration`, but return `true` immediately if shutdown is
/// signalled. Returns `false` if the full duration elapsed normally.
async fn sleep_or_shutdown(duration: std::time::Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.notified() => true,
    }
}

/// Periodic eviction of expired bans, stale violation windows, and the
/// active-client bound. Uses the same shard-locked maps as the foreground
/// writers, so no extra synchronization is needed.
fn start_sweeper(state: &ShieldState, shutdown: &Arc<Notify>) {
    let shield = state.shield.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        loop {
            if sleep_or_shutdown(shield::SWEEP_INTERVAL, &shutdown).await {
                return;
            }
            let now_ms = shield::epoch_ms();
            shield.abuse.sweep(now_ms);
            tracing::debug!(
                "shield: sweep completed, banned={}, active={}",
                shield.abuse.banned_count(now_ms),
                shield.abuse.active_count(),
            );
        }
    });
}

fn start_admin_server(state: &ShieldState) {
    let s = state.clone();
    let admin_addr = state.config.admin_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, s).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    // Signal all background loops to stop.
    shutdown.notify_waiters();
}
