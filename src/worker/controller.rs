//! The lifecycle controller embedded in every background worker.
//!
//! A [`ManagedWorker`] owns exactly one execution context (a tokio task) at a
//! time. Callers steer it only through the cancellation token, the pause gate,
//! and the state lock; the execution context is the only place that invokes
//! the task's update routine.

use super::error::WorkerError;
use super::gate::PauseGate;
use super::retry::{retry_operation, RetryPolicy};
use super::state::WorkerState;
use super::timer::UpdateTimer;
use crate::runtime::config::WorkerSettings;
use crate::runtime::telemetry::Telemetry;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout};
use tokio_util::sync::CancellationToken;

pub type UpdateFuture<'a> = Pin<Box<dyn Future<Output = Result<(), WorkerError>> + Send + 'a>>;

/// Work performed by a managed worker each time its update interval elapses.
pub trait WorkerTask: Send + Sync + 'static {
    /// Runs one update cycle. Errors returned here stop the worker; failures
    /// the task can recover from must be handled inside the cycle.
    fn update<'a>(&'a self, ctx: &'a WorkerContext) -> UpdateFuture<'a>;
}

/// Per-execution-context handle passed to [`WorkerTask::update`].
#[derive(Debug, Clone)]
pub struct WorkerContext {
    name: Arc<str>,
    cancellation: CancellationToken,
    retry: RetryPolicy,
}

impl WorkerContext {
    pub fn new(name: impl Into<Arc<str>>, cancellation: CancellationToken, retry: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            cancellation,
            retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn should_stop(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs `operation` under the worker's default retry policy, aborting the
    /// retry delay when the worker is stopped.
    pub async fn retry<T, F, Fut>(&self, operation: F) -> Result<T, WorkerError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, WorkerError>>,
    {
        retry_operation(self.retry, Some(&self.cancellation), operation).await
    }
}

struct Shared {
    name: Arc<str>,
    state: Mutex<WorkerState>,
    gate: PauseGate,
    timer: UpdateTimer,
    telemetry: Arc<Telemetry>,
    /// Execution contexts that have been spawned and not yet dropped.
    live_contexts: AtomicUsize,
}

impl Shared {
    fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!(
                worker = %self.name,
                previous = %*state,
                next = %next,
                "worker state changed"
            );
            *state = next;
        }
    }
}

/// Counts an execution context as live until its future is dropped, whether
/// it returned, panicked, or was aborted.
struct LiveContext(Arc<Shared>);

impl LiveContext {
    fn enter(shared: Arc<Shared>) -> Self {
        shared.live_contexts.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for LiveContext {
    fn drop(&mut self) {
        self.0.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RunSlot {
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Uniform start/pause/resume/stop/restart controller around a [`WorkerTask`].
pub struct ManagedWorker<T: WorkerTask> {
    task: Arc<T>,
    shared: Arc<Shared>,
    settings: WorkerSettings,
    run: Mutex<RunSlot>,
    transitions: tokio::sync::Mutex<()>,
}

impl<T: WorkerTask> ManagedWorker<T> {
    /// Spawns the execution context immediately. Must be called from within a
    /// tokio runtime.
    pub fn spawn(task: T, settings: WorkerSettings) -> Self {
        Self::spawn_with_telemetry(task, settings, Arc::new(Telemetry::default()))
    }

    pub fn spawn_with_telemetry(task: T, settings: WorkerSettings, telemetry: Arc<Telemetry>) -> Self {
        let shared = Arc::new(Shared {
            name: Arc::from(settings.name()),
            state: Mutex::new(WorkerState::Initializing),
            gate: PauseGate::new(),
            timer: UpdateTimer::new(settings.update_interval()),
            telemetry,
            live_contexts: AtomicUsize::new(0),
        });
        let cancellation = CancellationToken::new();
        let worker = Self {
            task: Arc::new(task),
            shared,
            settings,
            run: Mutex::new(RunSlot {
                cancellation: cancellation.clone(),
                handle: None,
            }),
            transitions: tokio::sync::Mutex::new(()),
        };

        worker.shared.set_state(WorkerState::Running);
        let handle = worker.spawn_context(cancellation);
        worker.run_slot().handle = Some(handle);
        tracing::debug!(
            worker = %worker.shared.name,
            interval_ms = worker.settings.update_interval().as_millis() as u64,
            "worker started"
        );
        worker
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.shared.telemetry.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn is_paused(&self) -> bool {
        !self.shared.gate.is_open()
    }

    /// Whether the current execution context has been asked to stop.
    pub fn should_stop(&self) -> bool {
        self.run_slot().cancellation.is_cancelled()
    }

    /// Whether an execution context is still running, including one that a
    /// concurrent `stop` is waiting on.
    pub fn is_alive(&self) -> bool {
        self.shared.live_contexts.load(Ordering::SeqCst) > 0
    }

    /// Interval gate shared with the execution context. Returns `true` (and
    /// consumes the slot) when an update is due.
    pub fn needs_update(&self) -> bool {
        self.shared.timer.needs_update()
    }

    /// Runs `operation` with the worker's retry defaults, optionally
    /// overridden per call.
    pub async fn retry_operation<R, F, Fut>(
        &self,
        operation: F,
        retries: Option<usize>,
        delay: Option<Duration>,
    ) -> Result<R, WorkerError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<R, WorkerError>>,
    {
        let mut policy = self.settings.retry_policy();
        if let Some(retries) = retries {
            policy = policy.with_max_attempts(retries);
        }
        if let Some(delay) = delay {
            policy = policy.with_delay(delay);
        }
        let cancellation = self.run_slot().cancellation.clone();
        retry_operation(policy, Some(&cancellation), operation).await
    }

    pub fn pause(&self) {
        tracing::debug!(worker = %self.shared.name, "pausing worker");
        self.shared.gate.close();
        self.shared.set_state(WorkerState::Paused);
    }

    pub fn resume(&self) {
        tracing::debug!(worker = %self.shared.name, "resuming worker");
        self.shared.gate.open();
        self.shared.set_state(WorkerState::Running);
    }

    /// Requests cancellation, releases a paused context, and waits up to the
    /// configured stop timeout for it to exit. The state is `Stopped`
    /// afterwards whether or not the context exited in time.
    pub async fn stop(&self) {
        let _guard = self.transitions.lock().await;
        self.stop_locked().await;
    }

    /// Stops a live context, then spawns a fresh one with a new cancellation
    /// token.
    pub async fn restart(&self) {
        let _guard = self.transitions.lock().await;
        tracing::debug!(worker = %self.shared.name, "restarting worker");

        if self.is_alive() {
            tracing::warn!(
                worker = %self.shared.name,
                "previous execution context still running; stopping before restart"
            );
            self.stop_locked().await;
        }

        let lingering = self.run_slot().handle.take();
        if let Some(handle) = lingering {
            if !handle.is_finished() {
                tracing::warn!(
                    worker = %self.shared.name,
                    "aborting execution context that ignored cancellation"
                );
                handle.abort();
            }
            // Resolves once the aborted future has been dropped.
            let _ = handle.await;
        }

        self.shared.set_state(WorkerState::Restarting);
        let cancellation = CancellationToken::new();
        self.shared.gate.open();
        self.shared.set_state(WorkerState::Running);
        let handle = self.spawn_context(cancellation.clone());

        let mut slot = self.run_slot();
        slot.cancellation = cancellation;
        slot.handle = Some(handle);
    }

    async fn stop_locked(&self) {
        tracing::debug!(worker = %self.shared.name, "stopping worker");

        let handle = {
            let mut slot = self.run_slot();
            slot.cancellation.cancel();
            slot.handle.take()
        };
        self.shared.gate.open();

        if let Some(handle) = handle {
            if let Some(lingering) = self.join_with_timeout(handle).await {
                self.run_slot().handle = Some(lingering);
            }
        }

        self.shared.set_state(WorkerState::Stopped);
    }

    async fn join_with_timeout(&self, mut handle: JoinHandle<()>) -> Option<JoinHandle<()>> {
        let stop_timeout = self.settings.stop_timeout();
        match timeout(stop_timeout, &mut handle).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                tracing::warn!(
                    worker = %self.shared.name,
                    error = %err,
                    "worker task terminated unexpectedly"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    worker = %self.shared.name,
                    timeout_ms = stop_timeout.as_millis() as u64,
                    "worker did not stop within timeout"
                );
                Some(handle)
            }
        }
    }

    fn spawn_context(&self, cancellation: CancellationToken) -> JoinHandle<()> {
        let task = Arc::clone(&self.task);
        let shared = Arc::clone(&self.shared);
        let ctx = WorkerContext::new(
            Arc::clone(&shared.name),
            cancellation,
            self.settings.retry_policy(),
        );

        let live = LiveContext::enter(Arc::clone(&shared));

        tokio::spawn(async move {
            let _live = live;
            let outcome = AssertUnwindSafe(run_loop(task.as_ref(), &shared, &ctx))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(worker = %shared.name, "worker loop exited");
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        worker = %shared.name,
                        error = %err,
                        "worker loop terminated by error; worker stopped"
                    );
                    shared.telemetry.record_fatal_exit();
                    shared.set_state(WorkerState::Stopped);
                }
                Err(panic_payload) => {
                    tracing::error!(
                        worker = %shared.name,
                        panic = %panic_message(panic_payload.as_ref()),
                        "worker loop panicked; worker stopped"
                    );
                    shared.telemetry.record_fatal_exit();
                    shared.set_state(WorkerState::Stopped);
                }
            }
        })
    }

    fn run_slot(&self) -> MutexGuard<'_, RunSlot> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: WorkerTask> Drop for ManagedWorker<T> {
    fn drop(&mut self) {
        self.run_slot().cancellation.cancel();
        self.shared.gate.open();
    }
}

async fn run_loop<T: WorkerTask>(
    task: &T,
    shared: &Shared,
    ctx: &WorkerContext,
) -> Result<(), WorkerError> {
    let token = ctx.cancellation();
    let mut gate = shared.gate.subscribe();

    loop {
        // Pause and cancellation are observed at the same suspension point.
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            open = PauseGate::wait_open(&mut gate) => {
                if !open {
                    break;
                }
            }
        }

        if token.is_cancelled() {
            break;
        }

        if shared.timer.needs_update() {
            shared.telemetry.record_update();
            match task.update(ctx).await {
                Ok(()) => {}
                Err(WorkerError::Cancelled) if token.is_cancelled() => break,
                Err(err) => return Err(err),
            }
            continue;
        }

        let next_due = shared.timer.next_due();
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = gate.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_until(next_due) => {}
        }
    }

    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
