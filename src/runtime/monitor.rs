use crate::firmware::{self, FirmwareStatus};
use crate::listener::{format_hashrate, MinerRecord, SocketListener};
use crate::price::{PriceFeedParams, PriceWorker, PriceWorkerRegistry, RewardSnapshot};
use crate::runtime::config::MonitorConfig;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry, TelemetrySnapshot};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One miner as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinerStatus {
    pub record: MinerRecord,
    pub firmware: FirmwareStatus,
}

/// Point-in-time view over both workers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub reward: RewardSnapshot,
    pub reward_stale: bool,
    /// Sorted by source identifier.
    pub miners: Vec<MinerStatus>,
    /// Sum of the readable `HashRate` reports, in hashes per second.
    pub total_hashrate: f64,
    pub total_hashrate_label: String,
    pub latest_firmware: Option<String>,
    pub telemetry: TelemetrySnapshot,
}

/// Owns the price worker and the UDP listener and handles OS signals for a
/// graceful shutdown.
pub struct Monitor {
    registry: PriceWorkerRegistry,
    price: Arc<PriceWorker>,
    listener: SocketListener,
    latest_firmware: Option<String>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    metrics: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Resolves the latest firmware, binds the listener, and starts the price
    /// worker against the default HTTP sources.
    pub async fn start(config: MonitorConfig) -> Result<Self> {
        let params = PriceFeedParams::http(&config.price_feed)?;
        Self::start_with(config, params).await
    }

    /// Same as [`start`](Self::start) with caller-supplied price collaborators.
    pub async fn start_with(config: MonitorConfig, params: PriceFeedParams) -> Result<Self> {
        let telemetry = Arc::new(Telemetry::default());
        let latest_firmware = resolve_latest_firmware(config.firmware_url.as_deref()).await;

        let listener =
            SocketListener::bind_with_telemetry(config.listener.clone(), telemetry.clone()).await?;

        let registry =
            PriceWorkerRegistry::with_telemetry(config.price_feed.backoff_policy(), telemetry.clone());
        let price = registry
            .get_or_start_with(config.price_feed.worker().clone(), params)
            .await;

        let shutdown = CancellationToken::new();
        let metrics = spawn_metrics_reporter(
            telemetry.clone(),
            shutdown.child_token(),
            config.metrics_interval,
        );

        tracing::info!(
            udp = %listener.local_addr(),
            latest_firmware = latest_firmware.as_deref().unwrap_or("unknown"),
            "monitor started"
        );

        Ok(Self {
            registry,
            price,
            listener,
            latest_firmware,
            telemetry,
            shutdown,
            metrics: Some(metrics),
        })
    }

    /// Root shutdown token; cancelling it ends [`run_until_ctrl_c`](Self::run_until_ctrl_c).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn price_worker(&self) -> &Arc<PriceWorker> {
        &self.price
    }

    pub fn listener(&self) -> &SocketListener {
        &self.listener
    }

    pub fn registry(&self) -> &PriceWorkerRegistry {
        &self.registry
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn latest_firmware(&self) -> Option<&str> {
        self.latest_firmware.as_deref()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let latest = self.latest_firmware.as_deref();
        let mut miners: Vec<MinerStatus> = self
            .listener
            .miners()
            .into_values()
            .map(|record| MinerStatus {
                firmware: FirmwareStatus::new(&record, latest),
                record,
            })
            .collect();
        miners.sort_by(|a, b| a.record.source_id().cmp(b.record.source_id()));
        let total_hashrate: f64 = miners.iter().filter_map(|m| m.record.hashrate()).sum();

        let feed = self.price.task();
        MonitorSnapshot {
            reward: feed.snapshot(),
            reward_stale: feed.is_stale(),
            miners,
            total_hashrate,
            total_hashrate_label: format_hashrate(total_hashrate),
            latest_firmware: self.latest_firmware.clone(),
            telemetry: self.telemetry.snapshot(),
        }
    }

    /// Stops both workers, releases the socket, and ends the metrics reporter.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        self.registry.reset().await;
        self.listener.stop().await;

        if let Some(handle) = self.metrics.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter terminated unexpectedly");
            }
        }
        tracing::info!("monitor stopped");
    }

    /// Runs until Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere, then stops.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        tracing::info!("monitor running; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("Ctrl-C received; shutting down monitor");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("monitor shutdown token cancelled");
            }
        }

        self.stop().await;
        Ok(())
    }
}

async fn resolve_latest_firmware(url: Option<&str>) -> Option<String> {
    let url = url?;
    let lookup = async {
        let client = firmware::client()?;
        firmware::fetch_latest_version(&client, url).await
    };

    match lookup.await {
        Ok(version) => {
            tracing::info!(version = %version, "latest miner firmware resolved");
            Some(version)
        }
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "failed to resolve latest miner firmware");
            None
        }
    }
}
