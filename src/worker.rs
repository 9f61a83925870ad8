//! Generic worker lifecycle: the start/pause/resume/stop/restart state
//! machine, the update-interval gate, and the bounded retry runner shared by
//! every background worker in the crate.

mod controller;
mod error;
mod gate;
mod retry;
mod state;
mod timer;


pub use controller::{ManagedWorker, UpdateFuture, WorkerContext, WorkerTask};
pub use error::WorkerError;
pub use gate::PauseGate;
pub use retry::{retry_operation, RetryPolicy};
pub use state::WorkerState;
pub use timer::UpdateTimer;
