use super::backoff::BackoffPolicy;
use super::failover::SourceFailover;
use super::feed::{PriceFeed, PriceFeedParams};
use crate::runtime::config::{PriceFeedConfig, WorkerSettings};
use crate::runtime::telemetry::Telemetry;
use crate::worker::ManagedWorker;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type PriceWorker = ManagedWorker<PriceFeed>;

/// Holds at most one price worker per registry.
///
/// Every worker created here shares the registry's [`SourceFailover`], so
/// source penalties and the preferred source survive a [`reset`](Self::reset).
pub struct PriceWorkerRegistry {
    failover: Arc<SourceFailover>,
    telemetry: Arc<Telemetry>,
    slot: Mutex<Option<Arc<PriceWorker>>>,
}

impl Default for PriceWorkerRegistry {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl PriceWorkerRegistry {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_telemetry(policy, Arc::new(Telemetry::default()))
    }

    pub fn with_telemetry(policy: BackoffPolicy, telemetry: Arc<Telemetry>) -> Self {
        Self {
            failover: Arc::new(SourceFailover::with_telemetry(policy, telemetry.clone())),
            telemetry,
            slot: Mutex::new(None),
        }
    }

    pub fn failover(&self) -> Arc<SourceFailover> {
        self.failover.clone()
    }

    pub async fn current(&self) -> Option<Arc<PriceWorker>> {
        self.slot.lock().await.clone()
    }

    /// Returns the existing worker, or starts one over HTTP from `config`.
    pub async fn get_or_start(&self, config: &PriceFeedConfig) -> Result<Arc<PriceWorker>> {
        let mut slot = self.slot.lock().await;
        if let Some(worker) = slot.as_ref() {
            return Ok(worker.clone());
        }

        let params = PriceFeedParams::http(config)?;
        Ok(self.start_locked(&mut slot, config.worker().clone(), params))
    }

    /// Like [`get_or_start`](Self::get_or_start) with caller-supplied
    /// collaborators. They are ignored when a worker already exists.
    pub async fn get_or_start_with(
        &self,
        settings: WorkerSettings,
        params: PriceFeedParams,
    ) -> Arc<PriceWorker> {
        let mut slot = self.slot.lock().await;
        if let Some(worker) = slot.as_ref() {
            tracing::debug!(worker = worker.name(), "reusing existing price worker");
            return worker.clone();
        }

        self.start_locked(&mut slot, settings, params)
    }

    /// Stops the current worker, if any, and forgets it so the next
    /// `get_or_start` creates a fresh one.
    ///
    /// The slot stays locked until the stop completes, so a concurrent
    /// `get_or_start` waits instead of starting a second worker.
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(worker) = slot.as_ref() {
            tracing::info!(worker = worker.name(), "resetting price worker");
            worker.stop().await;
        }
        *slot = None;
    }

    fn start_locked(
        &self,
        slot: &mut Option<Arc<PriceWorker>>,
        settings: WorkerSettings,
        params: PriceFeedParams,
    ) -> Arc<PriceWorker> {
        let feed = PriceFeed::new(params, self.failover.clone(), self.telemetry.clone());
        let worker = Arc::new(ManagedWorker::spawn_with_telemetry(
            feed,
            settings,
            self.telemetry.clone(),
        ));
        tracing::info!(worker = worker.name(), "price worker started");
        *slot = Some(worker.clone());
        worker
    }
}
