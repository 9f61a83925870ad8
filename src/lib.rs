pub mod firmware;
pub mod listener;
pub mod price;
pub mod runtime;
pub mod worker;

pub use firmware::{fetch_latest_version, versions_match, FirmwareStatus};
pub use listener::{decode_datagram, DatagramTask, MinerRecord, SocketListener};
pub use price::{
    default_sources, BackoffPolicy, HttpBlockHeight, HttpQuoteFetcher, PriceFeed, PriceFeedParams,
    PriceQuote, PriceSource, PriceWorker, PriceWorkerRegistry, RewardSnapshot, SourceFailover,
};
pub use runtime::config::{
    ListenerConfig, ListenerConfigBuilder, MonitorConfig, PriceFeedConfig, PriceFeedConfigBuilder,
    WorkerSettings, WorkerSettingsBuilder,
};
pub use runtime::monitor::{MinerStatus, Monitor, MonitorSnapshot};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use worker::{ManagedWorker, RetryPolicy, WorkerContext, WorkerError, WorkerState, WorkerTask};
