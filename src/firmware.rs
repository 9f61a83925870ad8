//! Latest-firmware lookup against the GitHub releases API and comparison
//! with the versions miners report.

use crate::listener::MinerRecord;
use crate::price::source::build_client;
use anyhow::{bail, Context, Result};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Returned when a release carries no tag.
pub const UNKNOWN_VERSION: &str = "Unknown version";

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github.v3+json";
pub const FIRMWARE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: Option<String>,
}

/// HTTP client used for firmware lookups.
pub fn client() -> Result<reqwest::Client> {
    build_client(FIRMWARE_REQUEST_TIMEOUT)
}

/// Resolves the tag of the latest release published at `url`.
pub async fn fetch_latest_version(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .header(ACCEPT, GITHUB_MEDIA_TYPE)
        .timeout(FIRMWARE_REQUEST_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("firmware release request to {url} failed"))?;

    let status = response.status();
    if status != StatusCode::OK {
        bail!("failed to retrieve the latest release: status {status}");
    }

    let release: Release = response
        .json()
        .await
        .context("firmware release payload is not valid JSON")?;

    Ok(release
        .tag_name
        .unwrap_or_else(|| UNKNOWN_VERSION.to_owned()))
}

/// Versions are compared verbatim; tags such as `v1.1.03i` do not follow a
/// numeric scheme.
pub fn versions_match(reported: &str, latest: &str) -> bool {
    reported == latest
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareStatus {
    pub reported: Option<String>,
    pub latest: Option<String>,
}

impl FirmwareStatus {
    pub fn new(record: &MinerRecord, latest: Option<&str>) -> Self {
        Self {
            reported: record.firmware_version().map(str::to_owned),
            latest: latest.map(str::to_owned),
        }
    }

    /// A miner is outdated when the latest version is known and its own
    /// version differs or is missing.
    pub fn is_outdated(&self) -> bool {
        match (&self.reported, &self.latest) {
            (Some(reported), Some(latest)) => !versions_match(reported, latest),
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    /// Reported version with a trailing `*` when outdated.
    pub fn label(&self) -> String {
        let mut label = self
            .reported
            .clone()
            .unwrap_or_else(|| "Unknown".to_owned());
        if self.is_outdated() {
            label.push('*');
        }
        label
    }
}
