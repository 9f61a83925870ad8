//! BTC price and block-reward fetching: the declarative source table, the
//! failover/backoff selector, the block-height collaborator, and the
//! `PriceFeed` worker task that ties them together.

pub mod backoff;
pub mod failover;
pub mod feed;
pub mod height;
pub mod registry;
pub mod reward;
pub mod source;

pub use backoff::{BackoffEntry, BackoffPolicy, BackoffTable};
pub use failover::{PriceQuote, SourceFailover};
pub use feed::{PriceFeed, PriceFeedParams};
pub use height::{parse_block_height, BlockHeightSource, HttpBlockHeight};
pub use registry::{PriceWorker, PriceWorkerRegistry};
pub use reward::{block_reward, halvings, reward_value_usd, RewardSnapshot, HALVING_INTERVAL};
pub use source::{default_sources, price_at, HttpQuoteFetcher, ParseFn, PriceSource, QuoteFetcher};
