//! Background backup scheduler
//!
//! One worker thread waits on a stop channel with a short tick timeout and
//! runs the job whenever the interval has elapsed. A stop request wakes the
//! worker immediately; a job already running finishes first.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Default polling tick
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default bound on how long `stop` waits for the worker
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Worker {
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    handle: thread::JoinHandle<()>,
}

/// Periodic job runner with cooperative cancellation
pub struct Scheduler {
    tick: Duration,
    stop_timeout: Duration,
    worker: Option<Worker>,
}

impl Scheduler {
    /// Create an idle scheduler with the given tick
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            worker: None,
        }
    }

    /// Override how long `stop` waits for the worker to exit
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Whether a worker is running
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start running `job` every `interval`
    ///
    /// The first run happens one interval after start. Returns `false` if the
    /// scheduler was already running (nothing changes).
    pub fn start<F>(&mut self, interval: Duration, mut job: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        if self.is_running() {
            debug!("Scheduler already running");
            return false;
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let tick = self.tick.min(interval);

        let handle = thread::spawn(move || {
            let mut next_due = Instant::now() + interval;
            loop {
                match stop_rx.recv_timeout(tick) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if Instant::now() >= next_due {
                            job();
                            next_due = Instant::now() + interval;
                        }
                    }
                }
            }
            let _ = done_tx.send(());
        });

        self.worker = Some(Worker {
            stop_tx,
            done_rx,
            handle,
        });
        info!(interval_secs = interval.as_secs_f64(), "Scheduler started");
        true
    }

    /// Stop the worker, waiting at most the stop timeout
    ///
    /// Returns `true` when the worker exited (or none was running) and
    /// `false` if it was still busy when the timeout elapsed; the thread is
    /// then detached and exits after its current job.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            debug!("Scheduler not running");
            return true;
        };

        let _ = worker.stop_tx.send(());
        match worker.done_rx.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                info!("Scheduler stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Scheduler worker did not exit in time, detaching");
                false
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
