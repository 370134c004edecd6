//! Heartbeat scheduler with pause/resume admission
//!
//! The loop waits at a single admission point until the scheduler is not
//! paused, runs one tick, then sleeps for the interval. Pausing never
//! interrupts a tick or a sleep already under way; it takes effect at the
//! next admission point. Cancellation interrupts both the wait and the sleep.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Active,
    Paused,
    /// Stop requested, loop not yet exited
    Cancelling,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Active => write!(f, "active"),
            SchedulerState::Paused => write!(f, "paused"),
            SchedulerState::Cancelling => write!(f, "cancelling"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
}

/// Work performed once per admitted tick
#[async_trait]
pub trait TickHandler: Send + Sync {
    /// `n` counts ticks since the scheduler was created, starting at 1
    async fn tick(&self, n: u64) -> Result<()>;
}

struct Running {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct Scheduler {
    interval: Duration,
    handler: Arc<dyn TickHandler>,
    paused: watch::Sender<bool>,
    pause_holds: AtomicUsize,
    ticks: Arc<AtomicU64>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(interval: Duration, handler: Arc<dyn TickHandler>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            interval,
            handler,
            paused,
            pause_holds: AtomicUsize::new(0),
            ticks: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks admitted so far
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn state(&self) -> SchedulerState {
        match self.running.lock().as_ref() {
            None => SchedulerState::Stopped,
            Some(r) if r.handle.is_finished() => SchedulerState::Stopped,
            Some(r) if r.cancel.is_cancelled() => SchedulerState::Cancelling,
            Some(_) if self.is_paused() => SchedulerState::Paused,
            Some(_) => SchedulerState::Active,
        }
    }

    /// Spawn the tick loop on the current tokio runtime
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.paused.send_replace(false);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.interval,
            Arc::clone(&self.handler),
            self.paused.subscribe(),
            Arc::clone(&self.ticks),
            cancel.clone(),
        ));
        *running = Some(Running { handle, cancel });
        Ok(())
    }

    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            debug!("Scheduler paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            debug!("Scheduler resumed");
        }
    }

    /// Pause now and resume when the last outstanding guard is dropped
    pub fn pause_guard(&self) -> PauseGuard<'_> {
        self.pause_holds.fetch_add(1, Ordering::SeqCst);
        self.pause();
        PauseGuard { scheduler: self }
    }

    /// Request the loop to exit. Safe while paused or mid-tick.
    pub fn stop(&self) {
        if let Some(r) = self.running.lock().as_ref() {
            if !r.cancel.is_cancelled() {
                info!("Stopping scheduler");
                r.cancel.cancel();
            }
        }
    }

    /// Wait for the loop task to exit. Call after [`Scheduler::stop`].
    pub async fn join(&self) {
        let running = self.running.lock().take();
        if let Some(r) = running {
            if let Err(e) = r.handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.interval)
            .field("state", &self.state())
            .field("ticks", &self.tick_count())
            .finish()
    }
}

/// Keeps the scheduler paused while alive
pub struct PauseGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        if self.scheduler.pause_holds.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.scheduler.resume();
        }
    }
}

async fn run_loop(
    interval: Duration,
    handler: Arc<dyn TickHandler>,
    mut paused: watch::Receiver<bool>,
    ticks: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    info!(interval_ms = interval.as_millis() as u64, "Scheduler started");

    loop {
        // Admission point
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            admitted = async { paused.wait_for(|p| !*p).await.map(|_| ()) } => {
                if admitted.is_err() {
                    break;
                }
            }
        }

        let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(tick = n, "Tick");
        if let Err(e) = handler.tick(n).await {
            error!(tick = n, error = %format!("{:#}", e), "Tick failed");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(ticks = ticks.load(Ordering::SeqCst), "Scheduler stopped");
}
