use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use hashwatch::{ListenerConfig, WorkerSettings};
use once_cell::sync::Lazy;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn worker_settings(name: &str, interval: Duration) -> WorkerSettings {
    WorkerSettings::builder()
        .name(name)
        .update_interval(interval)
        .retry_delay(Duration::from_millis(1))
        .stop_timeout(Duration::from_secs(2))
        .build()
        .expect("valid worker settings")
}

/// Listener on an ephemeral loopback port polling every 10 ms.
pub fn loopback_listener_config() -> ListenerConfig {
    ListenerConfig::builder()
        .worker(worker_settings("listener-test", Duration::from_millis(10)))
        .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .port(0)
        .readiness_timeout(Duration::from_millis(20))
        .receive_timeout(Duration::from_millis(500))
        .build()
        .expect("valid listener config")
}

pub async fn wait_until<F>(mut condition: F, limit: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn wait_until_async<F, Fut>(mut condition: F, limit: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition().await
}
