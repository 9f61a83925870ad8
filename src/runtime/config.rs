use crate::price::BackoffPolicy;
use crate::runtime::telemetry;
use crate::worker::RetryPolicy;
use anyhow::{bail, Context, Result};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 1;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;

const DEFAULT_PRICE_WORKER_NAME: &str = "BTC_Info";
const DEFAULT_PRICE_INTERVAL_SECS: u64 = 1800;
pub const DEFAULT_BLOCK_HEIGHT_URL: &str = "https://blockchain.info/q/getblockcount";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;
const DEFAULT_BACKOFF_CEILING_SECS: u64 = 600;

const DEFAULT_LISTENER_NAME: &str = "NMMiner_Info";
const DEFAULT_LISTENER_INTERVAL_MS: u64 = 500;
const DEFAULT_LISTENER_PORT: u16 = 12345;
const DEFAULT_READINESS_TIMEOUT_MS: u64 = 100;
const DEFAULT_RECEIVE_TIMEOUT_SECS: u64 = 5;
pub const MAX_DATAGRAM_BYTES: usize = 1024;

pub const DEFAULT_FIRMWARE_URL: &str =
    "https://api.github.com/repos/NMminer1024/NMMiner/releases/latest";

/// Lifecycle knobs shared by every managed worker.
///
/// Construct through [`WorkerSettings::builder`] so values are validated
/// before a worker is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    name: String,
    update_interval: Duration,
    max_retries: usize,
    retry_delay: Duration,
    stop_timeout: Duration,
}

impl WorkerSettings {
    pub fn builder() -> WorkerSettingsBuilder {
        WorkerSettingsBuilder::default()
    }

    /// Worker name used in every log line emitted by its execution context.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum time between two update cycles. Zero means every check is due.
    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Default attempt budget for `retry_operation`.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Default delay between retried attempts.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// How long `stop` waits for the execution context before giving up.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.name, "name")?;

        if self.max_retries == 0 {
            bail!("max_retries must be greater than 0");
        }

        if self.stop_timeout.is_zero() {
            bail!("stop_timeout must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct WorkerSettingsBuilder {
    name: Option<String>,
    update_interval: Option<Duration>,
    max_retries: Option<usize>,
    retry_delay: Option<Duration>,
    stop_timeout: Option<Duration>,
}

impl WorkerSettingsBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<WorkerSettings> {
        let settings = WorkerSettings {
            name: self.name.context("name is required")?.trim().to_owned(),
            update_interval: self
                .update_interval
                .context("update_interval is required")?,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: self
                .retry_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RETRY_DELAY_SECS)),
            stop_timeout: self
                .stop_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS)),
        };

        settings.validate()?;
        Ok(settings)
    }
}

/// Configuration of the price/reward worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceFeedConfig {
    worker: WorkerSettings,
    block_height_url: String,
    request_timeout: Duration,
    backoff_base: Duration,
    backoff_ceiling: Duration,
}

impl PriceFeedConfig {
    pub fn builder() -> PriceFeedConfigBuilder {
        PriceFeedConfigBuilder::default()
    }

    pub fn worker(&self) -> &WorkerSettings {
        &self.worker
    }

    /// Endpoint answering the current block height as plain text.
    pub fn block_height_url(&self) -> &str {
        &self.block_height_url
    }

    /// Per-request timeout applied to every price and height request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base, self.backoff_ceiling)
    }

    pub fn validate(&self) -> Result<()> {
        self.worker.validate()?;
        validate_url(&self.block_height_url, "block_height_url")?;

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.backoff_base.is_zero() {
            bail!("backoff_base must be greater than 0");
        }

        if self.backoff_ceiling < self.backoff_base {
            bail!("backoff_ceiling must be at least backoff_base");
        }

        Ok(())
    }
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            worker: WorkerSettings {
                name: DEFAULT_PRICE_WORKER_NAME.to_owned(),
                update_interval: Duration::from_secs(DEFAULT_PRICE_INTERVAL_SECS),
                max_retries: DEFAULT_MAX_RETRIES,
                retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
                stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            },
            block_height_url: DEFAULT_BLOCK_HEIGHT_URL.to_owned(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            backoff_ceiling: Duration::from_secs(DEFAULT_BACKOFF_CEILING_SECS),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PriceFeedConfigBuilder {
    worker: Option<WorkerSettings>,
    block_height_url: Option<String>,
    request_timeout: Option<Duration>,
    backoff_base: Option<Duration>,
    backoff_ceiling: Option<Duration>,
}

impl PriceFeedConfigBuilder {
    pub fn worker(mut self, settings: WorkerSettings) -> Self {
        self.worker = Some(settings);
        self
    }

    pub fn block_height_url(mut self, url: impl Into<String>) -> Self {
        self.block_height_url = Some(url.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = Some(base);
        self
    }

    pub fn backoff_ceiling(mut self, ceiling: Duration) -> Self {
        self.backoff_ceiling = Some(ceiling);
        self
    }

    pub fn build(self) -> Result<PriceFeedConfig> {
        let defaults = PriceFeedConfig::default();
        let config = PriceFeedConfig {
            worker: self.worker.unwrap_or(defaults.worker),
            block_height_url: self
                .block_height_url
                .map(|url| url.trim().to_owned())
                .unwrap_or(defaults.block_height_url),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            backoff_base: self.backoff_base.unwrap_or(defaults.backoff_base),
            backoff_ceiling: self.backoff_ceiling.unwrap_or(defaults.backoff_ceiling),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration of the UDP telemetry listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    worker: WorkerSettings,
    bind_address: IpAddr,
    port: u16,
    readiness_timeout: Duration,
    receive_timeout: Duration,
    max_datagram_bytes: usize,
}

impl ListenerConfig {
    pub fn builder() -> ListenerConfigBuilder {
        ListenerConfigBuilder::default()
    }

    pub fn worker(&self) -> &WorkerSettings {
        &self.worker
    }

    pub fn bind_address(&self) -> IpAddr {
        self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Upper bound on each readiness check performed by an update tick.
    pub fn readiness_timeout(&self) -> Duration {
        self.readiness_timeout
    }

    /// Upper bound on a receive once the socket reported readiness.
    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Largest payload read from a single datagram.
    pub fn max_datagram_bytes(&self) -> usize {
        self.max_datagram_bytes
    }

    pub fn validate(&self) -> Result<()> {
        self.worker.validate()?;

        if self.readiness_timeout.is_zero() {
            bail!("readiness_timeout must be greater than 0");
        }

        if self.receive_timeout.is_zero() {
            bail!("receive_timeout must be greater than 0");
        }

        if self.max_datagram_bytes == 0 || self.max_datagram_bytes > MAX_DATAGRAM_BYTES {
            bail!("max_datagram_bytes must be between 1 and {MAX_DATAGRAM_BYTES}");
        }

        Ok(())
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerSettings {
                name: DEFAULT_LISTENER_NAME.to_owned(),
                update_interval: Duration::from_millis(DEFAULT_LISTENER_INTERVAL_MS),
                max_retries: DEFAULT_MAX_RETRIES,
                retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
                stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            },
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_LISTENER_PORT,
            readiness_timeout: Duration::from_millis(DEFAULT_READINESS_TIMEOUT_MS),
            receive_timeout: Duration::from_secs(DEFAULT_RECEIVE_TIMEOUT_SECS),
            max_datagram_bytes: MAX_DATAGRAM_BYTES,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ListenerConfigBuilder {
    worker: Option<WorkerSettings>,
    bind_address: Option<IpAddr>,
    port: Option<u16>,
    readiness_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
    max_datagram_bytes: Option<usize>,
}

impl ListenerConfigBuilder {
    pub fn worker(mut self, settings: WorkerSettings) -> Self {
        self.worker = Some(settings);
        self
    }

    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = Some(timeout);
        self
    }

    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn max_datagram_bytes(mut self, bytes: usize) -> Self {
        self.max_datagram_bytes = Some(bytes);
        self
    }

    pub fn build(self) -> Result<ListenerConfig> {
        let defaults = ListenerConfig::default();
        let config = ListenerConfig {
            worker: self.worker.unwrap_or(defaults.worker),
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            port: self.port.unwrap_or(defaults.port),
            readiness_timeout: self
                .readiness_timeout
                .unwrap_or(defaults.readiness_timeout),
            receive_timeout: self.receive_timeout.unwrap_or(defaults.receive_timeout),
            max_datagram_bytes: self
                .max_datagram_bytes
                .unwrap_or(defaults.max_datagram_bytes),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Top-level configuration consumed by [`Monitor`](crate::Monitor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub price_feed: PriceFeedConfig,
    pub listener: ListenerConfig,
    /// Release endpoint used to resolve the latest miner firmware. `None`
    /// skips the lookup.
    pub firmware_url: Option<String>,
    pub metrics_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            price_feed: PriceFeedConfig::default(),
            listener: ListenerConfig::default(),
            firmware_url: Some(DEFAULT_FIRMWARE_URL.to_owned()),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

impl MonitorConfig {
    /// Builds a configuration from defaults overridden by `HASHWATCH_*`
    /// environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let mut listener = ListenerConfig::builder().worker(config.listener.worker.clone());
        if let Some(address) = env_value::<IpAddr>("HASHWATCH_UDP_BIND")? {
            listener = listener.bind_address(address);
        }
        if let Some(port) = env_value::<u16>("HASHWATCH_UDP_PORT")? {
            listener = listener.port(port);
        }
        config.listener = listener.build()?;

        let mut price_feed = PriceFeedConfig::builder();
        if let Some(secs) = env_value::<u64>("HASHWATCH_PRICE_INTERVAL_SECS")? {
            let defaults = &config.price_feed.worker;
            price_feed = price_feed.worker(
                WorkerSettings::builder()
                    .name(defaults.name())
                    .update_interval(Duration::from_secs(secs))
                    .max_retries(defaults.max_retries())
                    .retry_delay(defaults.retry_delay())
                    .stop_timeout(defaults.stop_timeout())
                    .build()?,
            );
        }
        if let Some(url) = env_value::<String>("HASHWATCH_BLOCK_HEIGHT_URL")? {
            price_feed = price_feed.block_height_url(url);
        }
        config.price_feed = price_feed.build()?;

        if let Some(url) = env_value::<String>("HASHWATCH_FIRMWARE_URL")? {
            let url = url.trim().to_owned();
            if url.is_empty() {
                config.firmware_url = None;
            } else {
                validate_url(&url, "HASHWATCH_FIRMWARE_URL")?;
                config.firmware_url = Some(url);
            }
        }

        Ok(config)
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> WorkerSettingsBuilder {
        WorkerSettings::builder()
            .name("test-worker")
            .update_interval(Duration::from_secs(1))
    }

    #[test]
    fn builder_applies_lifecycle_defaults() {
        let settings = base_settings().build().unwrap();
        assert_eq!(settings.name(), "test-worker");
        assert_eq!(settings.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(
            settings.retry_delay(),
            Duration::from_secs(DEFAULT_RETRY_DELAY_SECS)
        );
        assert_eq!(
            settings.stop_timeout(),
            Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS)
        );
        assert_eq!(
            settings.retry_policy(),
            RetryPolicy::new(DEFAULT_MAX_RETRIES, Duration::from_secs(1))
        );
    }

    #[test]
    fn worker_settings_validation_catches_invalid_values() {
        let err = base_settings().name("   ").build().unwrap_err();
        assert!(format!("{err}").contains("name"), "error should mention name");

        let err = base_settings().max_retries(0).build().unwrap_err();
        assert!(
            format!("{err}").contains("max_retries"),
            "error should mention max_retries"
        );

        let err = base_settings()
            .stop_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(
            format!("{err}").contains("stop_timeout"),
            "error should mention stop_timeout"
        );

        let err = WorkerSettings::builder().name("x").build().unwrap_err();
        assert!(
            format!("{err}").contains("update_interval"),
            "error should mention missing update_interval"
        );
    }

    #[test]
    fn zero_update_interval_is_allowed() {
        let settings = base_settings()
            .update_interval(Duration::ZERO)
            .build()
            .expect("zero interval means always due");
        assert!(settings.update_interval().is_zero());
    }

    #[test]
    fn price_feed_defaults_match_reference_cadence() {
        let config = PriceFeedConfig::builder().build().unwrap();
        assert_eq!(config.worker().name(), DEFAULT_PRICE_WORKER_NAME);
        assert_eq!(
            config.worker().update_interval(),
            Duration::from_secs(DEFAULT_PRICE_INTERVAL_SECS)
        );
        assert_eq!(config.block_height_url(), DEFAULT_BLOCK_HEIGHT_URL);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.backoff_policy(),
            BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(600))
        );
    }

    #[test]
    fn price_feed_validation_catches_invalid_values() {
        let err = PriceFeedConfig::builder()
            .block_height_url("ftp://example")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("http:// or https://"));

        let err = PriceFeedConfig::builder()
            .request_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("request_timeout"));

        let err = PriceFeedConfig::builder()
            .backoff_base(Duration::from_secs(10))
            .backoff_ceiling(Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("backoff_ceiling"));
    }

    #[test]
    fn listener_defaults_and_limits() {
        let config = ListenerConfig::builder().build().unwrap();
        assert_eq!(config.port(), DEFAULT_LISTENER_PORT);
        assert_eq!(config.bind_address(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.max_datagram_bytes(), MAX_DATAGRAM_BYTES);
        assert_eq!(
            config.worker().update_interval(),
            Duration::from_millis(DEFAULT_LISTENER_INTERVAL_MS)
        );

        let err = ListenerConfig::builder()
            .max_datagram_bytes(MAX_DATAGRAM_BYTES + 1)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("max_datagram_bytes"));

        let err = ListenerConfig::builder()
            .readiness_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("readiness_timeout"));
    }

    #[test]
    fn monitor_config_reads_overrides_from_env() {
        let keys = [
            ("HASHWATCH_UDP_BIND", "127.0.0.1"),
            ("HASHWATCH_UDP_PORT", "23456"),
            ("HASHWATCH_PRICE_INTERVAL_SECS", "60"),
            ("HASHWATCH_BLOCK_HEIGHT_URL", "http://localhost:8080/height"),
            ("HASHWATCH_FIRMWARE_URL", ""),
        ];
        for (key, value) in keys {
            env::set_var(key, value);
        }
        let config = MonitorConfig::from_env();
        for (key, _) in keys {
            env::remove_var(key);
        }

        let config = config.unwrap();
        assert_eq!(
            config.listener.socket_addr(),
            "127.0.0.1:23456".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            config.price_feed.worker().update_interval(),
            Duration::from_secs(60)
        );
        assert_eq!(config.price_feed.worker().name(), DEFAULT_PRICE_WORKER_NAME);
        assert_eq!(
            config.price_feed.block_height_url(),
            "http://localhost:8080/height"
        );
        assert!(config.firmware_url.is_none(), "empty value disables the lookup");
    }

    #[test]
    fn env_value_reports_the_offending_key() {
        let key = "HASHWATCH_TEST_ONLY_PORT";
        env::set_var(key, "not-a-port");
        let err = env_value::<u16>(key).unwrap_err();
        env::remove_var(key);
        assert!(format!("{err}").contains(key));

        assert!(env_value::<u16>(key).unwrap().is_none());
    }
}
