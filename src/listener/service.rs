use super::record::MinerRecord;
use super::task::DatagramTask;
use crate::runtime::config::ListenerConfig;
use crate::runtime::telemetry::Telemetry;
use crate::worker::{ManagedWorker, WorkerState};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Managed worker bound to one UDP socket for its whole lifetime.
pub struct SocketListener {
    worker: ManagedWorker<DatagramTask>,
}

impl SocketListener {
    /// Binds the configured address and starts polling it.
    pub async fn bind(config: ListenerConfig) -> Result<Self> {
        Self::bind_with_telemetry(config, Arc::new(Telemetry::default())).await
    }

    pub async fn bind_with_telemetry(config: ListenerConfig, telemetry: Arc<Telemetry>) -> Result<Self> {
        let addr = config.socket_addr();
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind UDP socket on {addr}"))?;
        let task = DatagramTask::new(socket, &config, telemetry.clone())?;

        tracing::info!(
            worker = config.worker().name(),
            addr = %task.local_addr(),
            "listening for miner reports"
        );

        Ok(Self {
            worker: ManagedWorker::spawn_with_telemetry(task, config.worker().clone(), telemetry),
        })
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn is_paused(&self) -> bool {
        self.worker.is_paused()
    }

    pub fn is_alive(&self) -> bool {
        self.worker.is_alive()
    }

    pub fn pause(&self) {
        self.worker.pause();
    }

    pub fn resume(&self) {
        self.worker.resume();
    }

    /// Restarts the polling context. A listener whose socket was released by
    /// [`stop`](Self::stop) keeps running without receiving anything.
    pub async fn restart(&self) {
        if !self.is_socket_open() {
            tracing::warn!(worker = self.name(), "restarting listener without a socket");
        }
        self.worker.restart().await;
    }

    /// Stops the polling context, then releases the socket.
    pub async fn stop(&self) {
        self.worker.stop().await;
        self.worker.task().release_socket();
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.worker.task().local_addr()
    }

    pub fn is_socket_open(&self) -> bool {
        self.worker.task().is_socket_open()
    }

    pub fn miners(&self) -> HashMap<String, MinerRecord> {
        self.worker.task().miners()
    }

    pub fn miner(&self, source_id: &str) -> Option<MinerRecord> {
        self.worker.task().miner(source_id)
    }

    pub fn task(&self) -> &Arc<DatagramTask> {
        self.worker.task()
    }

    pub fn worker(&self) -> &ManagedWorker<DatagramTask> {
        &self.worker
    }
}
