use super::source::build_client;
use crate::worker::WorkerError;
use anyhow::Result;
use futures::future::BoxFuture;
use std::time::Duration;

/// Source of the current chain height.
///
/// Transport failures are reported as [`WorkerError::OperationFailed`] and
/// unusable payloads as [`WorkerError::UpdateFailed`], so both are retried.
pub trait BlockHeightSource: Send + Sync {
    fn block_height(&self) -> BoxFuture<'_, Result<u64, WorkerError>>;
}

/// Plain-text height endpoint such as `blockchain.info/q/getblockcount`.
#[derive(Debug, Clone)]
pub struct HttpBlockHeight {
    client: reqwest::Client,
    url: String,
}

impl HttpBlockHeight {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(build_client(request_timeout)?, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl BlockHeightSource for HttpBlockHeight {
    fn block_height(&self) -> BoxFuture<'_, Result<u64, WorkerError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|err| {
                    WorkerError::operation_failed(format!(
                        "block height request to {} failed: {err}",
                        self.url
                    ))
                })?;

            let body = response.text().await.map_err(|err| {
                WorkerError::operation_failed(format!("failed to read block height body: {err}"))
            })?;

            parse_block_height(&body)
        })
    }
}

pub fn parse_block_height(body: &str) -> Result<u64, WorkerError> {
    body.trim().parse::<u64>().map_err(|err| {
        WorkerError::update_failed(format!("unexpected block height payload {body:?}: {err}"))
    })
}
