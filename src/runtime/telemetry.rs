use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by the workers of one monitor.
#[derive(Default, Debug)]
pub struct Telemetry {
    updates: AtomicU64,
    fatal_exits: AtomicU64,
    source_failures: AtomicU64,
    snapshot_fallbacks: AtomicU64,
    datagrams_accepted: AtomicU64,
    datagrams_dropped: AtomicU64,
}

impl Telemetry {
    pub fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fatal_exit(&self) {
        self.fatal_exits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_failure(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_fallback(&self) {
        self.snapshot_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_datagram_accepted(&self) {
        self.datagrams_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_datagram_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            updates: self.updates.load(Ordering::Relaxed),
            fatal_exits: self.fatal_exits.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
            snapshot_fallbacks: self.snapshot_fallbacks.load(Ordering::Relaxed),
            datagrams_accepted: self.datagrams_accepted.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub updates: u64,
    pub fatal_exits: u64,
    pub source_failures: u64,
    pub snapshot_fallbacks: u64,
    pub datagrams_accepted: u64,
    pub datagrams_dropped: u64,
}

/// Spawns a background task that periodically logs the telemetry counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "hashwatch::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    tracing::info!(
                        target: "hashwatch::metrics",
                        updates = snapshot.updates,
                        fatal_exits = snapshot.fatal_exits,
                        source_failures = snapshot.source_failures,
                        snapshot_fallbacks = snapshot.snapshot_fallbacks,
                        datagrams_accepted = snapshot.datagrams_accepted,
                        datagrams_dropped = snapshot.datagrams_dropped,
                        "runtime metrics snapshot"
                    );
                }
            }
        }
    })
}
