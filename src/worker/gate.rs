use std::sync::Arc;
use tokio::sync::watch;

/// Open/closed gate the execution context waits on before each update check.
///
/// Backed by a `watch` channel so a closed gate can be reopened (or a paused
/// worker stopped) without polling.
#[derive(Debug, Clone)]
pub struct PauseGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn close(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Waits until the gate is open. Returns `false` only if the gate was
    /// dropped while waiting.
    pub async fn wait_open(rx: &mut watch::Receiver<bool>) -> bool {
        rx.wait_for(|open| *open).await.is_ok()
    }
}
