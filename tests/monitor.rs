mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hashwatch::firmware::{self, UNKNOWN_VERSION};
use hashwatch::price::{price_at, BlockHeightSource, QuoteFetcher};
use hashwatch::{
    fetch_latest_version, HttpBlockHeight, HttpQuoteFetcher, Monitor, MonitorConfig,
    PriceFeedConfig, PriceFeedParams, PriceSource, WorkerState,
};
use serde_json::Value;
use support::helpers::{init_tracing, loopback_listener_config, wait_until, worker_settings};
use support::mock_http::MockHttpServer;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const RELEASE_PATH: &str = "/repos/NMminer1024/NMMiner/releases/latest";

fn last(raw: &Value) -> Result<f64> {
    price_at(raw, "/last")
}

fn params(server: &MockHttpServer) -> Result<PriceFeedParams> {
    let transport: Arc<dyn QuoteFetcher> =
        Arc::new(HttpQuoteFetcher::new(Duration::from_secs(2))?);
    let heights: Arc<dyn BlockHeightSource> = Arc::new(HttpBlockHeight::new(
        server.url("/q/getblockcount"),
        Duration::from_secs(2),
    )?);
    Ok(PriceFeedParams {
        sources: vec![PriceSource::new("Gemini", server.url("/ticker"), last)].into(),
        transport,
        heights,
    })
}

fn config(server: &MockHttpServer) -> Result<MonitorConfig> {
    Ok(MonitorConfig {
        price_feed: PriceFeedConfig::builder()
            .worker(worker_settings("BTC_Info", Duration::from_secs(3600)))
            .block_height_url(server.url("/q/getblockcount"))
            .build()?,
        listener: loopback_listener_config(),
        firmware_url: Some(server.url(RELEASE_PATH)),
        metrics_interval: Duration::from_millis(50),
    })
}

#[tokio::test]
async fn latest_version_is_read_from_release_tag() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let client = firmware::client()?;

    server.respond(RELEASE_PATH, 200, r#"{"tag_name":"v0.3.01","name":"NMMiner"}"#);
    let version = fetch_latest_version(&client, &server.url(RELEASE_PATH)).await?;
    assert_eq!(version, "v0.3.01");
    assert_eq!(
        server.last_accept(RELEASE_PATH).as_deref(),
        Some("application/vnd.github.v3+json")
    );

    server.respond(RELEASE_PATH, 200, r#"{"name":"untagged"}"#);
    let version = fetch_latest_version(&client, &server.url(RELEASE_PATH)).await?;
    assert_eq!(version, UNKNOWN_VERSION);

    server.respond(RELEASE_PATH, 403, r#"{"message":"rate limited"}"#);
    let err = fetch_latest_version(&client, &server.url(RELEASE_PATH))
        .await
        .unwrap_err();
    assert!(format!("{err}").contains("403"));

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn monitor_combines_reward_and_sorted_miner_reports() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    server.respond("/ticker", 200, r#"{"last":"64000.00"}"#);
    server.respond("/q/getblockcount", 200, "840000");
    server.respond(RELEASE_PATH, 200, r#"{"tag_name":"v0.3.01"}"#);

    let mut monitor = Monitor::start_with(config(&server)?, params(&server)?).await?;
    assert_eq!(monitor.latest_firmware(), Some("v0.3.01"));

    let addr = monitor.listener().local_addr();
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket
        .send_to(br#"{"ip":"192.168.1.9","Version":"v0.2.0","HashRate":"1.02MH/s"}"#, addr)
        .await?;
    socket
        .send_to(br#"{"ip":"192.168.1.10","Version":"v0.3.01","HashRate":"980KH/s"}"#, addr)
        .await?;

    assert!(
        wait_until(
            || {
                let snapshot = monitor.snapshot();
                snapshot.miners.len() == 2 && !snapshot.reward.source_name.is_empty()
            },
            Duration::from_secs(5)
        )
        .await
    );

    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.reward.source_name, "Gemini");
    assert_eq!(snapshot.reward.reward_value_usd, 200000.0);
    assert!(!snapshot.reward_stale);

    let ids: Vec<&str> = snapshot.miners.iter().map(|m| m.record.source_id()).collect();
    assert_eq!(ids, vec!["192.168.1.10", "192.168.1.9"]);
    assert!(!snapshot.miners[0].firmware.is_outdated());
    assert!(snapshot.miners[1].firmware.is_outdated());
    assert_eq!(snapshot.telemetry.datagrams_accepted, 2);
    assert!((snapshot.total_hashrate - 2_000_000.0).abs() < 1e-3);
    assert_eq!(snapshot.total_hashrate_label, "2.00MH/s");

    let encoded = serde_json::to_value(&snapshot)?;
    assert_eq!(encoded["miners"][1]["record"]["Version"], "v0.2.0");

    monitor.stop().await;
    assert_eq!(monitor.price_worker().state(), WorkerState::Stopped);
    assert_eq!(monitor.listener().state(), WorkerState::Stopped);
    assert!(!monitor.listener().is_socket_open());
    assert!(monitor.registry().current().await.is_none());

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn monitor_starts_without_firmware_and_stops_on_token() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    server.respond("/ticker", 200, r#"{"last":1}"#);
    server.respond("/q/getblockcount", 200, "0");

    let mut monitor = Monitor::start_with(config(&server)?, params(&server)?).await?;
    assert_eq!(monitor.latest_firmware(), None, "404 from the release endpoint is tolerated");

    let token = monitor.cancellation_token();
    token.cancel();
    timeout(Duration::from_secs(5), monitor.run_until_ctrl_c())
        .await
        .expect("monitor should stop once its token is cancelled")?;

    assert_eq!(monitor.price_worker().state(), WorkerState::Stopped);
    assert!(!monitor.listener().is_socket_open());

    server.shutdown().await;
    Ok(())
}
