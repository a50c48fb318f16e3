//! Execution bridge — lets synchronous callers drive one long-lived async context.
//!
//! A single worker thread owns a current-thread tokio runtime and the state
//! `S` hosted on it. Callers on any thread hand it operations through
//! [`ExecutionBridge::submit`], which enqueues the operation and blocks until
//! it finishes or the submit timeout elapses. Operations run one at a time in
//! queue order, so `S` is single-writer and needs no locks (nor `Send`).
//!
//! A timed-out operation is **not** cancelled: it keeps running on the worker
//! and may commit its effect after the caller has been told `Timeout`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures_util::future::{FutureExt, LocalBoxFuture};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// A queued operation, already wired to its reply channel.
type Job<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> LocalBoxFuture<'a, ()> + Send>;

fn boxed_job<S, F>(f: F) -> Job<S>
where
    S: 'static,
    F: for<'a> FnOnce(&'a mut S) -> LocalBoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

// ─────────────────────────────────────────────
// Worker handle
// ─────────────────────────────────────────────

/// Poll interval while waiting for a stopping worker to exit.
const EXIT_POLL: Duration = Duration::from_millis(10);

struct Worker<S: 'static> {
    handle: JoinHandle<()>,
    /// `None` once the worker has been told to stop.
    jobs: Option<mpsc::UnboundedSender<Job<S>>>,
    shutdown: Arc<Notify>,
    ready: Arc<AtomicBool>,
}

impl<S: 'static> Worker<S> {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    fn is_stopping(&self) -> bool {
        self.jobs.is_none()
    }

    /// Stop taking new work. The worker leaves its loop after the current job.
    fn stop(&mut self) {
        self.jobs = None;
        self.shutdown.notify_one();
    }

    fn join(self) {
        if self.handle.join().is_err() {
            warn!("Execution worker panicked");
        }
    }
}

// ─────────────────────────────────────────────
// ExecutionBridge
// ─────────────────────────────────────────────

/// Single-consumer work queue feeding one async execution context.
///
/// At most one worker exists at a time: a worker that outlives the shutdown
/// grace period stays in its slot, marked stopping, until it exits.
pub struct ExecutionBridge<S: Default + 'static> {
    worker: Mutex<Option<Worker<S>>>,
    submit_timeout: Duration,
    shutdown_grace: Duration,
    startup_attempts: u32,
    startup_poll: Duration,
}

impl<S: Default + 'static> Default for ExecutionBridge<S> {
    fn default() -> Self {
        Self::new(&BridgeConfig::default())
    }
}

impl<S: Default + 'static> ExecutionBridge<S> {
    /// Create a stopped bridge. Nothing runs until [`ensure_running`](Self::ensure_running).
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            worker: Mutex::new(None),
            submit_timeout: config.submit_timeout(),
            shutdown_grace: config.shutdown_grace(),
            startup_attempts: config.startup_attempts.max(1),
            startup_poll: config.startup_poll(),
        }
    }

    /// Override the per-call submit timeout.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Override the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker<S>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a live worker is currently accepting work.
    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| w.is_alive() && !w.is_stopping())
    }

    /// Start the worker if it is not already running, then wait for readiness.
    ///
    /// Idempotent. Fails with [`BridgeError::Stopping`] while a previous worker
    /// is still finishing, and with [`BridgeError::NotStarted`] if the context
    /// does not report ready within `startup_attempts × startup_poll`. The
    /// worker lock is not held while polling.
    pub fn ensure_running(&self) -> Result<(), BridgeError> {
        let ready = {
            let mut slot = self.lock_worker();

            if slot.as_ref().is_some_and(|w| !w.is_alive()) {
                if let Some(worker) = slot.take() {
                    if !worker.is_stopping() {
                        warn!("Execution worker exited unexpectedly, restarting");
                    }
                    worker.join();
                }
            }

            match slot.as_ref() {
                Some(worker) if worker.is_stopping() => {
                    warn!("Execution worker is still stopping, not starting another");
                    return Err(BridgeError::Stopping);
                }
                Some(worker) => worker.ready.clone(),
                None => {
                    let worker = self.spawn_worker()?;
                    let ready = worker.ready.clone();
                    *slot = Some(worker);
                    ready
                }
            }
        };

        for _ in 0..self.startup_attempts {
            if ready.load(Ordering::SeqCst) {
                return Ok(());
            }
            if !self.owns_live_worker(&ready) {
                break;
            }
            std::thread::sleep(self.startup_poll);
        }

        error!(
            attempts = self.startup_attempts,
            "Execution context did not become ready"
        );
        if let Some(worker) = self.lock_worker().as_mut() {
            if Arc::ptr_eq(&worker.ready, &ready) {
                worker.stop();
            }
        }
        Err(BridgeError::NotStarted {
            attempts: self.startup_attempts,
        })
    }

    /// Whether the slot still holds the live worker owning `ready`.
    fn owns_live_worker(&self, ready: &Arc<AtomicBool>) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| Arc::ptr_eq(&w.ready, ready) && w.is_alive())
    }

    fn spawn_worker(&self) -> Result<Worker<S>, BridgeError> {
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<Job<S>>();
        let shutdown = Arc::new(Notify::new());
        let ready = Arc::new(AtomicBool::new(false));

        let worker_shutdown = shutdown.clone();
        let worker_ready = ready.clone();

        let handle = std::thread::Builder::new()
            .name("pulsar-exec".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(error = %e, "Failed to build execution runtime");
                        return;
                    }
                };

                runtime.block_on(async move {
                    let mut state = S::default();
                    worker_ready.store(true, Ordering::SeqCst);
                    debug!("Execution context ready");

                    loop {
                        tokio::select! {
                            biased;
                            _ = worker_shutdown.notified() => break,
                            job = jobs_rx.recv() => match job {
                                Some(job) => job(&mut state).await,
                                None => break,
                            },
                        }
                    }
                });

                debug!("Execution context stopped");
            })
            .map_err(|e| {
                error!(error = %e, "Failed to spawn execution worker");
                BridgeError::NotStarted { attempts: 0 }
            })?;

        info!("Execution worker started");

        Ok(Worker {
            handle,
            jobs: Some(jobs_tx),
            shutdown,
            ready,
        })
    }

    /// Run `op` against the hosted state and block until it returns.
    ///
    /// Fails with [`BridgeError::NotRunning`] before `ensure_running` or after
    /// `shutdown`, and with [`BridgeError::Timeout`] if the operation outlives
    /// the submit timeout.
    pub fn submit<T, F>(&self, op: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> LocalBoxFuture<'a, T> + Send + 'static,
    {
        let jobs = match self.lock_worker().as_ref() {
            Some(Worker {
                jobs: Some(jobs), ..
            }) if !jobs.is_closed() => jobs.clone(),
            _ => return Err(BridgeError::NotRunning),
        };

        let (reply_tx, reply_rx) = std_mpsc::sync_channel::<T>(1);
        let job = boxed_job::<S, _>(move |state| {
            async move {
                let output = op(state).await;
                // Nobody may be listening after a timeout.
                let _ = reply_tx.send(output);
            }
            .boxed_local()
        });

        jobs.send(job).map_err(|_| BridgeError::WorkerGone)?;

        match reply_rx.recv_timeout(self.submit_timeout) {
            Ok(output) => Ok(output),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_s = self.submit_timeout.as_secs_f64(),
                    "Submitted operation timed out; it keeps running"
                );
                Err(BridgeError::Timeout {
                    secs: self.submit_timeout.as_secs(),
                })
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(BridgeError::WorkerGone),
        }
    }

    /// Stop taking new work and wait up to the grace period for the worker to exit.
    ///
    /// Returns `false` (and logs) if the worker is still busy after the grace
    /// period. It then stays in the slot as stopping, so no second worker can
    /// start until it exits. Safe to call when stopped, and again later to
    /// reap a stopping worker.
    pub fn shutdown(&self) -> bool {
        let ready = match self.lock_worker().as_mut() {
            Some(worker) => {
                worker.stop();
                worker.ready.clone()
            }
            None => return true,
        };

        let deadline = Instant::now() + self.shutdown_grace;
        loop {
            {
                let mut slot = self.lock_worker();
                let exited = match slot.as_ref() {
                    Some(w) if Arc::ptr_eq(&w.ready, &ready) => !w.is_alive(),
                    // Reaped by a concurrent caller.
                    _ => return true,
                };
                if exited {
                    if let Some(worker) = slot.take() {
                        worker.join();
                    }
                    info!("Execution worker stopped");
                    return true;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "Execution worker did not stop within the grace period"
                );
                return false;
            }
            std::thread::sleep(EXIT_POLL.min(deadline - now));
        }
    }
}

impl<S: Default + 'static> Drop for ExecutionBridge<S> {
    fn drop(&mut self) {
        let running = self
            .worker
            .get_mut()
            .map(|w| w.is_some())
            .unwrap_or(false);
        if running {
            self.shutdown();
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
