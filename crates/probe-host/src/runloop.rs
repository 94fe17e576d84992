//! The run loop: one cooperative event loop per run manager, driven on
//! a dedicated OS thread, with a thread-safe bridge for synchronous
//! callers.

use crate::{ActorError, TERMINATE_DRAIN};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Handle for a piece of work submitted to the loop from another
/// thread. `result` blocks the calling thread until the work finishes
/// or the timeout elapses.
pub struct WorkHandle<T> {
    rx: std_mpsc::Receiver<T>,
    what: String,
}

impl<T> WorkHandle<T> {
    /// Blocks for the result. `None` waits indefinitely.
    pub fn result(self, timeout: Option<Duration>) -> Result<T, ActorError> {
        match timeout {
            Some(limit) => self.rx.recv_timeout(limit).map_err(|err| match err {
                std_mpsc::RecvTimeoutError::Timeout => ActorError::Timeout(limit, self.what),
                std_mpsc::RecvTimeoutError::Disconnected => ActorError::Terminated,
            }),
            None => self.rx.recv().map_err(|_| ActorError::Terminated),
        }
    }
}

/// Abort/inspect handle for a long-lived task registered on the loop.
///
/// Cancellation is cooperative: it is delivered at the task's next
/// suspension point.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    inner: tokio::task::AbortHandle,
}

impl TaskHandle {
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// A single-threaded tokio runtime running forever on its own OS
/// thread.
///
/// All motor TCP I/O for one run manager lives on this loop; coroutines
/// suspend only at socket operations and timed sleeps, so non-I/O work
/// (mask rebuilds, matrix math) runs to completion without yielding.
#[derive(Debug)]
pub struct RunLoop {
    handle: tokio::runtime::Handle,
    tasks: Mutex<Vec<TaskHandle>>,
    shutdown: Mutex<Option<(oneshot::Sender<()>, std::thread::JoinHandle<()>)>>,
}

impl RunLoop {
    /// Builds the runtime and parks it on a new named thread.
    pub fn spawn(name: &str) -> Result<Self, ActorError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(format!("runloop-{name}"))
            .spawn(move || {
                // Drives every spawned task until the stop signal, then
                // drops the runtime (cancelling whatever remains).
                let _ = runtime.block_on(stop_rx);
                debug!("run loop stopping");
            })?;

        Ok(Self {
            handle,
            tasks: Mutex::new(Vec::new()),
            shutdown: Mutex::new(Some((stop_tx, thread))),
        })
    }

    /// Whether the loop is still accepting work.
    pub fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Submits a future to the loop and returns a handle the calling
    /// thread can block on.
    pub fn submit<F, T>(&self, what: &str, future: F) -> WorkHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        WorkHandle {
            rx,
            what: what.to_string(),
        }
    }

    /// Spawns a long-lived task (a motor link, a heartbeat) and
    /// registers it for cancellation at terminate.
    pub fn spawn_task<F>(&self, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let join = self.handle.spawn(future);
        let handle = TaskHandle {
            inner: join.abort_handle(),
        };
        self.tasks.lock().push(handle.clone());
        handle
    }

    /// Cancels every registered task and waits up to the drain budget
    /// for them to finish. With `delay_loop_stop` the loop itself keeps
    /// running (the caller owns further shutdown); otherwise the loop
    /// thread is stopped and joined.
    pub fn terminate(&self, delay_loop_stop: bool) {
        {
            let tasks = self.tasks.lock();
            for task in tasks.iter() {
                task.abort();
            }
        }

        let deadline = Instant::now() + TERMINATE_DRAIN;
        loop {
            let all_done = self.tasks.lock().iter().all(|t| t.is_finished());
            if all_done {
                break;
            }
            if Instant::now() >= deadline {
                warn!("run loop tasks did not drain within {TERMINATE_DRAIN:?}");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        self.tasks.lock().clear();

        if delay_loop_stop {
            return;
        }

        if let Some((stop_tx, thread)) = self.shutdown.lock().take() {
            let _ = stop_tx.send(());
            let _ = thread.join();
        }
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        if let Some((stop_tx, thread)) = self.shutdown.lock().take() {
            let _ = stop_tx.send(());
            let _ = thread.join();
        }
    }
}
