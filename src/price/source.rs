//! Declarative price-source table.
//!
//! A source is a name, an endpoint, and a pure parser over the decoded JSON
//! body. The failover selector walks the table; nothing here performs I/O
//! except [`HttpQuoteFetcher`].

use super::reward::round_cents;
use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Extracts a USD price from a decoded response body.
pub type ParseFn = fn(&Value) -> Result<f64>;

#[derive(Clone)]
pub struct PriceSource {
    pub name: String,
    pub url: String,
    pub parse: ParseFn,
}

impl PriceSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, parse: ParseFn) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            parse,
        }
    }

    pub fn parse(&self, raw: &Value) -> Result<f64> {
        (self.parse)(raw).with_context(|| format!("{} returned an unusable payload", self.name))
    }
}

impl fmt::Debug for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceSource")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Reads the price at a JSON `pointer`, accepting either a JSON number or a
/// numeric string, rounded to cents.
pub fn price_at(raw: &Value, pointer: &str) -> Result<f64> {
    let value = raw
        .pointer(pointer)
        .with_context(|| format!("missing field {pointer}"))?;

    let price = match value {
        Value::Number(number) => number
            .as_f64()
            .with_context(|| format!("price at {pointer} is not representable"))?,
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid price {text:?} at {pointer}"))?,
        other => bail!("unexpected price type at {pointer}: {other}"),
    };

    if !price.is_finite() || price <= 0.0 {
        bail!("price at {pointer} must be a positive number, got {price}");
    }

    Ok(round_cents(price))
}

fn bitstamp(raw: &Value) -> Result<f64> {
    price_at(raw, "/last")
}

fn kraken(raw: &Value) -> Result<f64> {
    price_at(raw, "/result/XXBTZUSD/c/0")
}

fn coingecko(raw: &Value) -> Result<f64> {
    price_at(raw, "/bitcoin/usd")
}

fn okx(raw: &Value) -> Result<f64> {
    price_at(raw, "/data/0/last")
}

fn huobi(raw: &Value) -> Result<f64> {
    price_at(raw, "/tick/close")
}

fn bybit(raw: &Value) -> Result<f64> {
    price_at(raw, "/result/0/last_price")
}

fn ticker_price(raw: &Value) -> Result<f64> {
    price_at(raw, "/price")
}

fn cryptocompare(raw: &Value) -> Result<f64> {
    price_at(raw, "/USD")
}

fn gemini(raw: &Value) -> Result<f64> {
    price_at(raw, "/last")
}

fn blockchain_com(raw: &Value) -> Result<f64> {
    price_at(raw, "/USD/last")
}

fn coinpaprika(raw: &Value) -> Result<f64> {
    price_at(raw, "/quotes/USD/price")
}

/// Built-in sources in reputation order.
pub fn default_sources() -> Vec<PriceSource> {
    vec![
        PriceSource::new("Bitstamp", "https://www.bitstamp.net/api/v2/ticker/btcusd/", bitstamp),
        PriceSource::new(
            "Kraken",
            "https://api.kraken.com/0/public/Ticker?pair=XBTUSD",
            kraken,
        ),
        PriceSource::new(
            "Coingecko",
            "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd",
            coingecko,
        ),
        PriceSource::new(
            "OKX",
            "https://www.okx.com/api/v5/market/ticker?instId=BTC-USDT",
            okx,
        ),
        PriceSource::new(
            "Huobi",
            "https://api.huobi.pro/market/detail/merged?symbol=btcusdt",
            huobi,
        ),
        PriceSource::new(
            "ByBit",
            "https://api.bybit.com/v2/public/tickers?symbol=BTCUSD",
            bybit,
        ),
        PriceSource::new(
            "MEXC",
            "https://api.mexc.com/api/v3/ticker/price?symbol=BTCUSDT",
            ticker_price,
        ),
        PriceSource::new(
            "Binance",
            "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT",
            ticker_price,
        ),
        PriceSource::new(
            "CryptoCompare",
            "https://min-api.cryptocompare.com/data/price?fsym=BTC&tsyms=USD",
            cryptocompare,
        ),
        PriceSource::new("Gemini", "https://api.gemini.com/v1/pubticker/btcusd", gemini),
        PriceSource::new(
            "Blockchain.com",
            "https://blockchain.info/ticker",
            blockchain_com,
        ),
        PriceSource::new(
            "CoinPaprika",
            "https://api.coinpaprika.com/v1/tickers/btc-bitcoin",
            coinpaprika,
        ),
    ]
}

/// Transport used by the failover selector to retrieve a source's raw body.
pub trait QuoteFetcher: Send + Sync {
    fn fetch<'a>(&'a self, source: &'a PriceSource) -> BoxFuture<'a, Result<Value>>;
}

/// HTTP transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpQuoteFetcher {
    client: reqwest::Client,
}

impl HttpQuoteFetcher {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(build_client(request_timeout)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl QuoteFetcher for HttpQuoteFetcher {
    fn fetch<'a>(&'a self, source: &'a PriceSource) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&source.url)
                .send()
                .await
                .with_context(|| format!("request to {} failed", source.name))?
                .error_for_status()
                .with_context(|| format!("{} answered with an error status", source.name))?;

            response
                .json::<Value>()
                .await
                .with_context(|| format!("{} returned a non-JSON body", source.name))
        })
    }
}

pub(crate) fn build_client(request_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .user_agent(concat!("hashwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}
