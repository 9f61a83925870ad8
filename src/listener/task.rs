use super::record::{decode_datagram, MinerRecord};
use crate::runtime::config::ListenerConfig;
use crate::runtime::telemetry::Telemetry;
use crate::worker::{UpdateFuture, WorkerContext, WorkerError, WorkerTask};
use anyhow::{Context, Result};
use chrono::Local;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Update routine of the listener worker.
///
/// Each tick waits briefly for the socket to become readable and, if it does,
/// receives one datagram. The socket slot is emptied on teardown; ticks that
/// find it empty do nothing.
pub struct DatagramTask {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    miners: RwLock<HashMap<String, MinerRecord>>,
    readiness_timeout: Duration,
    receive_timeout: Duration,
    max_datagram_bytes: usize,
    telemetry: Arc<Telemetry>,
}

impl DatagramTask {
    pub fn new(socket: UdpSocket, config: &ListenerConfig, telemetry: Arc<Telemetry>) -> Result<Self> {
        let local_addr = socket
            .local_addr()
            .context("failed to read bound socket address")?;

        Ok(Self {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            miners: RwLock::new(HashMap::new()),
            readiness_timeout: config.readiness_timeout(),
            receive_timeout: config.receive_timeout(),
            max_datagram_bytes: config.max_datagram_bytes(),
            telemetry,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_socket_open(&self) -> bool {
        self.socket_slot().is_some()
    }

    /// Closes the socket. Returns `false` if it was already released.
    pub fn release_socket(&self) -> bool {
        let socket = self.socket_slot().take();
        match socket {
            Some(socket) => {
                drop(socket);
                tracing::info!(addr = %self.local_addr, "UDP socket closed");
                true
            }
            None => false,
        }
    }

    pub fn miners(&self) -> HashMap<String, MinerRecord> {
        self.miners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn miner(&self, source_id: &str) -> Option<MinerRecord> {
        self.miners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_id)
            .cloned()
    }

    pub fn miner_count(&self) -> usize {
        self.miners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Decodes `raw` and stores it under its source identifier, replacing any
    /// previous record. Returns whether the datagram was accepted.
    pub fn process_datagram(&self, raw: &[u8]) -> bool {
        match decode_datagram(raw, &Local::now()) {
            Ok(record) => {
                tracing::debug!(
                    miner = record.source_id(),
                    fields = record.fields().len(),
                    "miner report received"
                );
                self.miners
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(record.source_id().to_owned(), record);
                self.telemetry.record_datagram_accepted();
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, bytes = raw.len(), "discarding datagram");
                self.telemetry.record_datagram_dropped();
                false
            }
        }
    }

    /// Waits for one datagram within the readiness timeout and processes it.
    /// Returns `Ok(false)` when nothing arrived or the socket is released.
    pub async fn receive_datagram(&self, cancellation: &CancellationToken) -> Result<bool> {
        let socket = self.socket_slot().clone();
        let Some(socket) = socket else {
            tracing::trace!("socket released; skipping receive");
            return Ok(false);
        };

        let ready = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Ok(false),
            ready = timeout(self.readiness_timeout, socket.readable()) => ready,
        };
        match ready {
            Err(_) => return Ok(false),
            Ok(result) => result.context("socket readiness check failed")?,
        }

        let mut buffer = vec![0u8; self.max_datagram_bytes];
        let received = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Ok(false),
            received = timeout(self.receive_timeout, socket.recv_from(&mut buffer)) => received,
        };

        match received {
            Ok(Ok((len, peer))) => {
                tracing::trace!(%peer, bytes = len, "datagram received");
                Ok(self.process_datagram(&buffer[..len]))
            }
            Ok(Err(err)) => Err(err).context("failed to receive datagram"),
            Err(_) => {
                tracing::debug!(
                    timeout_ms = self.receive_timeout.as_millis() as u64,
                    "socket reported readiness but no datagram arrived"
                );
                Ok(false)
            }
        }
    }

    fn socket_slot(&self) -> MutexGuard<'_, Option<Arc<UdpSocket>>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkerTask for DatagramTask {
    fn update<'a>(&'a self, ctx: &'a WorkerContext) -> UpdateFuture<'a> {
        Box::pin(async move {
            if let Err(err) = self.receive_datagram(ctx.cancellation()).await {
                // A failed receive only costs this tick.
                tracing::warn!(worker = ctx.name(), error = %format!("{err:#}"), "receive failed");
            }
            Ok::<(), WorkerError>(())
        })
    }
}
