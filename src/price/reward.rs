use serde::Serialize;

/// Blocks between two subsidy halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Subsidy of the genesis epoch, in BTC.
pub const INITIAL_BLOCK_REWARD_BTC: f64 = 50.0;

/// Price, reward, and reward value produced by one successful fetch cycle.
///
/// Always replaced as a whole; readers never observe a mix of two cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RewardSnapshot {
    pub source_name: String,
    pub price: f64,
    pub reward: f64,
    pub reward_value_usd: f64,
}

pub fn halvings(height: u64) -> u64 {
    height / HALVING_INTERVAL
}

/// Block subsidy in BTC at `height`.
pub fn block_reward(height: u64) -> f64 {
    let exponent = halvings(height).min(i32::MAX as u64) as i32;
    INITIAL_BLOCK_REWARD_BTC / 2f64.powi(exponent)
}

pub fn reward_value_usd(reward: f64, price: f64) -> f64 {
    round_cents(reward * price)
}

pub(crate) fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
