use std::fmt;

/// Lifecycle position of a [`ManagedWorker`](super::ManagedWorker).
///
/// `Stopped` is terminal for the current execution context but may be left
/// again through `restart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Initializing,
    Running,
    Paused,
    Restarting,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Initializing => "initializing",
            WorkerState::Running => "running",
            WorkerState::Paused => "paused",
            WorkerState::Restarting => "restarting",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
