//! Bridge handle for submitting work from synchronous callers.

use crate::bridge::loop_impl::run_bridge_loop;
use crate::bridge::request::BridgeRequest;
use crate::error::ManagerError;
use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Name of the dedicated worker thread.
const WORKER_THREAD_NAME: &str = "toolpool-bridge";
/// Poll interval while waiting for the worker to terminate.
const JOIN_POLL_INTERVAL_MS: u64 = 10;

/// Handle for sending work to the dedicated bridge worker.
///
/// Cloning is cheap; all clones feed the same worker.
#[derive(Clone)]
pub struct Bridge {
    tx: mpsc::UnboundedSender<BridgeRequest>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    worker_id: ThreadId,
}

impl Bridge {
    /// Spawn the worker thread with its own current-thread runtime.
    pub fn start() -> Result<Self, ManagerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_bridge_loop(runtime, rx))?;
        let worker_id = handle.thread().id();
        info!("Bridge worker started");
        Ok(Self {
            tx,
            worker: Arc::new(Mutex::new(Some(handle))),
            worker_id,
        })
    }

    /// Enqueue `work` without waiting for it.
    pub fn spawn<T, F>(&self, work: F) -> Result<PendingResult<T>, ManagerError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ManagerError>> + Send + 'static,
    {
        let (tx, rx) = std_mpsc::sync_channel(1);
        let job = Box::pin(async move {
            // The caller may have given up waiting; that is not an error here.
            let _ = tx.send(work.await);
        });
        self.tx.send(BridgeRequest::Run { work: job })?;
        Ok(PendingResult { rx })
    }

    /// Run `work` on the worker and block the calling thread until it finishes
    /// or `deadline` elapses.
    ///
    /// On `Timeout` the work is not cancelled; it runs to completion inside the
    /// worker and its result is discarded.
    pub fn submit<T, F>(&self, work: F, deadline: Option<Duration>) -> Result<T, ManagerError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ManagerError>> + Send + 'static,
    {
        if thread::current().id() == self.worker_id {
            return Err(ManagerError::UnexpectedFailure(
                "blocking submit from the bridge worker would deadlock".into(),
            ));
        }
        self.spawn(work)?.wait(deadline)
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop accepting work and wait up to `deadline` for the worker to exit.
    ///
    /// Returns `false` if the worker is still running at the deadline; the
    /// thread is then left to finish on its own.
    pub fn shutdown(&self, deadline: Duration) -> bool {
        let _ = self.tx.send(BridgeRequest::Shutdown);

        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            match worker.take() {
                Some(handle) => handle,
                None => return true,
            }
        };

        let start = Instant::now();
        while !handle.is_finished() {
            if start.elapsed() >= deadline {
                warn!(
                    timeout_ms = deadline.as_millis() as u64,
                    "Bridge worker did not terminate within deadline"
                );
                return false;
            }
            thread::sleep(Duration::from_millis(JOIN_POLL_INTERVAL_MS));
        }

        if handle.join().is_err() {
            error!("Bridge worker panicked");
        }
        info!("Bridge worker stopped");
        true
    }
}

/// Ticket for work enqueued with [`Bridge::spawn`].
pub struct PendingResult<T> {
    rx: std_mpsc::Receiver<Result<T, ManagerError>>,
}

impl<T> PendingResult<T> {
    /// Block until the work completes, the worker goes away, or `deadline` elapses.
    pub fn wait(self, deadline: Option<Duration>) -> Result<T, ManagerError> {
        match deadline {
            None => self.rx.recv()?,
            Some(deadline) => match self.rx.recv_timeout(deadline) {
                Ok(result) => result,
                Err(std_mpsc::RecvTimeoutError::Timeout) => Err(ManagerError::Timeout(deadline)),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(ManagerError::WorkerClosed),
            },
        }
    }
}
