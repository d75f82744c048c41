/// Periodic flush of the write-back buffer into durable storage
use playlog_core::{Flusher, PlaylogError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct FlushScheduler {
    flusher: Arc<Flusher>,
    interval: Duration,
    pass_timeout: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    pub fn new(flusher: Arc<Flusher>, interval: Duration, pass_timeout: Duration) -> Self {
        Self {
            flusher,
            interval,
            pass_timeout,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the periodic task
    ///
    /// The first pass runs one interval after start. Calling `start` on a
    /// running or stopped scheduler does nothing.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() || self.cancel.is_cancelled() {
            tracing::warn!("Flush scheduler already started or stopped");
            return;
        }

        let flusher = Arc::clone(&self.flusher);
        let cancel = self.cancel.clone();
        let interval = self.interval;
        let pass_timeout = self.pass_timeout;

        *handle = Some(tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs_f64(), "Flush scheduler started");
            run_loop(flusher, interval, pass_timeout, cancel).await;
            tracing::info!("Flush scheduler stopped");
        }));
    }

    /// Cancel the periodic task and wait for it to exit
    ///
    /// A pass in flight is dropped; records it had not yet deleted stay
    /// buffered.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Flush scheduler task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }
}

async fn run_loop(
    flusher: Arc<Flusher>,
    interval: Duration,
    pass_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("Flush pass abandoned on shutdown");
                break;
            }
            result = flusher.run_pass_with_timeout(pass_timeout) => match result {
                Ok(report) => {
                    tracing::debug!(flushed = report.flushed, failed = report.failed, "Scheduled flush pass done");
                }
                Err(PlaylogError::PassTimedOut(limit)) => {
                    tracing::warn!(timeout_secs = limit.as_secs_f64(), "Scheduled flush pass timed out");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Scheduled flush pass aborted");
                }
            }
        }
    }
}
