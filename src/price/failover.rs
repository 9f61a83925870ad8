use super::backoff::{BackoffEntry, BackoffPolicy, BackoffTable};
use super::source::{PriceSource, QuoteFetcher};
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// Price and the name of the source that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub source: String,
    pub price: f64,
}

impl PriceQuote {
    /// Result of a cycle in which no source produced a price.
    pub fn unavailable() -> Self {
        Self {
            source: String::new(),
            price: 0.0,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.source.is_empty()
    }
}

#[derive(Debug, Default)]
struct FailoverState {
    backoff: BackoffTable,
    preferred: Option<String>,
}

/// Walks a source table, preferring the last source that worked and skipping
/// sources that are inside their backoff window.
///
/// The table is shared by every feed that uses this selector, so it outlives
/// individual worker instances.
#[derive(Debug)]
pub struct SourceFailover {
    state: Mutex<FailoverState>,
    telemetry: Option<Arc<Telemetry>>,
}

impl Default for SourceFailover {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl SourceFailover {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: Mutex::new(FailoverState {
                backoff: BackoffTable::new(policy),
                preferred: None,
            }),
            telemetry: None,
        }
    }

    pub fn with_telemetry(policy: BackoffPolicy, telemetry: Arc<Telemetry>) -> Self {
        Self {
            telemetry: Some(telemetry),
            ..Self::new(policy)
        }
    }

    /// Source that produced the most recent successful quote.
    pub fn preferred(&self) -> Option<String> {
        self.state().preferred.clone()
    }

    pub fn backoff_entry(&self, name: &str) -> Option<BackoffEntry> {
        self.state().backoff.entry(name)
    }

    pub fn is_backed_off(&self, name: &str) -> bool {
        self.state().backoff.is_backed_off(name, Instant::now())
    }

    /// Forgets every penalty and the preferred source.
    pub fn reset(&self) {
        let mut state = self.state();
        state.backoff.clear();
        state.preferred = None;
    }

    /// `sources` with the preferred source moved to the front; the relative
    /// order of the others is kept.
    pub fn ordered<'s>(&self, sources: &'s [PriceSource]) -> Vec<&'s PriceSource> {
        let preferred = self.preferred();
        order_sources(sources, preferred.as_deref())
    }

    /// Tries each eligible source in order and returns the first price that
    /// parses. Returns [`PriceQuote::unavailable`] when every source failed
    /// or is backed off.
    pub async fn fetch(&self, sources: &[PriceSource], transport: &dyn QuoteFetcher) -> PriceQuote {
        let candidates: Vec<&PriceSource> = {
            let state = self.state();
            let now = Instant::now();
            order_sources(sources, state.preferred.as_deref())
                .into_iter()
                .filter(|source| {
                    let backed_off = state.backoff.is_backed_off(&source.name, now);
                    if backed_off {
                        tracing::trace!(source = %source.name, "skipping source in backoff");
                    }
                    !backed_off
                })
                .collect()
        };

        for source in candidates {
            match attempt(source, transport).await {
                Ok(price) => {
                    {
                        let mut state = self.state();
                        state.backoff.record_success(&source.name);
                        state.preferred = Some(source.name.clone());
                    }
                    tracing::debug!(source = %source.name, price, "price source answered");
                    return PriceQuote {
                        source: source.name.clone(),
                        price,
                    };
                }
                Err(err) => {
                    let delay = self
                        .state()
                        .backoff
                        .record_failure(&source.name, Instant::now());
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_source_failure();
                    }
                    tracing::warn!(
                        source = %source.name,
                        error = %format!("{err:#}"),
                        backoff_secs = delay.as_secs(),
                        "price source failed; backing off"
                    );
                }
            }
        }

        tracing::warn!("no price source available");
        PriceQuote::unavailable()
    }

    fn state(&self) -> MutexGuard<'_, FailoverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn attempt(source: &PriceSource, transport: &dyn QuoteFetcher) -> Result<f64> {
    let raw = transport.fetch(source).await?;
    source.parse(&raw)
}

fn order_sources<'s>(sources: &'s [PriceSource], preferred: Option<&str>) -> Vec<&'s PriceSource> {
    let mut ordered: Vec<&PriceSource> = sources.iter().collect();
    if let Some(preferred) = preferred {
        if let Some(index) = ordered.iter().position(|source| source.name == preferred) {
            let source = ordered.remove(index);
            ordered.insert(0, source);
        }
    }
    ordered
}
