//! The price/reward worker task.
//!
//! One update cycle picks a price through the failover selector, reads the
//! chain height with retries, and derives the block reward and its USD value.
//! Only a fully successful cycle replaces the snapshot; any failure leaves the
//! last good snapshot in place.

use super::failover::SourceFailover;
use super::height::{BlockHeightSource, HttpBlockHeight};
use super::reward::{block_reward, reward_value_usd, RewardSnapshot};
use super::source::{build_client, default_sources, HttpQuoteFetcher, PriceSource, QuoteFetcher};
use crate::runtime::config::PriceFeedConfig;
use crate::runtime::telemetry::Telemetry;
use crate::worker::{UpdateFuture, WorkerContext, WorkerError, WorkerTask};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Collaborators of a [`PriceFeed`] that callers may substitute.
#[derive(Clone)]
pub struct PriceFeedParams {
    pub sources: Arc<[PriceSource]>,
    pub transport: Arc<dyn QuoteFetcher>,
    pub heights: Arc<dyn BlockHeightSource>,
}

impl PriceFeedParams {
    /// Default source table over HTTP, with one client shared by the price
    /// and height requests.
    pub fn http(config: &PriceFeedConfig) -> Result<Self> {
        let client = build_client(config.request_timeout())?;
        Ok(Self {
            sources: default_sources().into(),
            transport: Arc::new(HttpQuoteFetcher::with_client(client.clone())),
            heights: Arc::new(HttpBlockHeight::with_client(
                client,
                config.block_height_url(),
            )),
        })
    }
}

pub struct PriceFeed {
    sources: Arc<[PriceSource]>,
    transport: Arc<dyn QuoteFetcher>,
    heights: Arc<dyn BlockHeightSource>,
    failover: Arc<SourceFailover>,
    snapshot: RwLock<RewardSnapshot>,
    stale: AtomicBool,
    telemetry: Arc<Telemetry>,
}

impl PriceFeed {
    pub fn new(params: PriceFeedParams, failover: Arc<SourceFailover>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            sources: params.sources,
            transport: params.transport,
            heights: params.heights,
            failover,
            snapshot: RwLock::new(RewardSnapshot::default()),
            stale: AtomicBool::new(false),
            telemetry,
        }
    }

    /// Last good snapshot. Zeroed until the first successful cycle.
    pub fn snapshot(&self) -> RewardSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the most recent cycle failed and the snapshot predates it.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }

    pub fn failover(&self) -> &Arc<SourceFailover> {
        &self.failover
    }

    pub fn sources(&self) -> &[PriceSource] {
        &self.sources
    }

    /// Runs one fetch cycle and returns the values callers should expose:
    /// the fresh snapshot on success, the previous one otherwise.
    pub async fn refresh(&self, ctx: &WorkerContext) -> RewardSnapshot {
        match self.fetch_cycle(ctx).await {
            Ok(fresh) => {
                tracing::info!(
                    worker = ctx.name(),
                    source = %fresh.source_name,
                    price = fresh.price,
                    reward = fresh.reward,
                    reward_value_usd = fresh.reward_value_usd,
                    "price and reward updated"
                );
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
                self.stale.store(false, Ordering::Relaxed);
                fresh
            }
            Err(err) => {
                if ctx.should_stop() {
                    tracing::debug!(worker = ctx.name(), error = %err, "refresh interrupted by shutdown");
                } else {
                    tracing::error!(
                        worker = ctx.name(),
                        error = %err,
                        "price/reward refresh failed; keeping last good snapshot"
                    );
                }
                self.telemetry.record_snapshot_fallback();
                self.stale.store(true, Ordering::Relaxed);
                self.snapshot()
            }
        }
    }

    async fn fetch_cycle(&self, ctx: &WorkerContext) -> Result<RewardSnapshot, WorkerError> {
        let quote = self.failover.fetch(&self.sources, self.transport.as_ref()).await;
        if !quote.is_available() {
            return Err(WorkerError::update_failed("no price source produced a quote"));
        }

        let height = ctx.retry(|_| self.heights.block_height()).await?;
        let reward = block_reward(height);
        tracing::debug!(worker = ctx.name(), height, reward, "block height resolved");

        Ok(RewardSnapshot {
            reward_value_usd: reward_value_usd(reward, quote.price),
            source_name: quote.source,
            price: quote.price,
            reward,
        })
    }
}

impl WorkerTask for PriceFeed {
    fn update<'a>(&'a self, ctx: &'a WorkerContext) -> UpdateFuture<'a> {
        Box::pin(async move {
            self.refresh(ctx).await;
            Ok(())
        })
    }
}
