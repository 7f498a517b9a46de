//! Bounded worker pool and in-flight accounting.
//!
//! Workers are long-lived tokio tasks sharing a single work channel. Each
//! one waits for either a job or the shutdown signal; shutdown wins when both
//! are ready. A job that was already taken is always run to completion, and a
//! job that panics is logged without taking its worker down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use ptwar_system::ShutdownSignal;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A unit of work executed by the pool.
pub type Job = BoxFuture<'static, ()>;

/// Fixed-size set of workers pulling from one shared channel.
#[derive(Debug)]
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Launch `count` workers. They run until `shutdown` fires or the pool's
    /// sender is dropped.
    #[must_use]
    pub fn spawn(count: usize, shutdown: ShutdownSignal) -> Self {
        let (tx, rx) = mpsc::channel(count.max(1));
        let rx = Arc::new(Mutex::new(rx));

        info!(count, "starting workers");
        let handles = (0..count)
            .map(|id| tokio::spawn(run_worker(id, Arc::clone(&rx), shutdown.clone())))
            .collect();

        Self { tx, handles }
    }

    /// Number of workers launched.
    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Hand a job to the next idle worker, waiting while every worker is busy.
    ///
    /// Returns `false` if all workers have exited; the job is dropped.
    pub async fn dispatch(&self, job: Job) -> bool {
        self.tx.send(job).await.is_ok()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        drop(self.tx);
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(%err, "worker task failed");
            }
        }
    }
}

async fn run_worker(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, shutdown: ShutdownSignal) {
    debug!(worker = id, "worker started");

    loop {
        let job = tokio::select! {
            biased;
            () = shutdown.wait() => {
                debug!(worker = id, "worker stopping on shutdown");
                break;
            }
            job = next_job(&rx) => job,
        };

        let Some(job) = job else {
            debug!(worker = id, "work channel closed");
            break;
        };

        if let Err(payload) = AssertUnwindSafe(job).catch_unwind().await {
            error!(
                worker = id,
                panic = panic_message(payload.as_ref()),
                "work item panicked"
            );
        }
    }

    debug!(worker = id, "worker stopped");
}

async fn next_job(rx: &Mutex<mpsc::Receiver<Job>>) -> Option<Job> {
    rx.lock().await.recv().await
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

#[derive(Debug, Default)]
struct InFlightInner {
    count: AtomicUsize,
    idle: Notify,
}

/// Counter of dispatched-but-unfinished work items.
///
/// Every item holds an [`InFlightGuard`]; the count drops when the guard is
/// dropped, whether the item completed, panicked, or was discarded unrun.
#[derive(Debug, Default, Clone)]
pub struct InFlight {
    inner: Arc<InFlightInner>,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more in-flight item.
    #[must_use]
    pub fn enter(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Resolves once no item is in flight.
    pub async fn idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Poll the counter every `interval` until it reaches zero.
    ///
    /// Used on shutdown, where the caller's own timeout must be able to cut
    /// the wait short between two polls.
    pub async fn drain(&self, interval: Duration) {
        while self.count() > 0 {
            tokio::time::sleep(interval).await;
        }
    }
}

/// Keeps one item counted as in flight until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<InFlightInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use tokio::sync::watch;

    use super::*;

    fn signal() -> (watch::Sender<bool>, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, ShutdownSignal::new(rx))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_jobs_run() {
        let (_tx, shutdown) = signal();
        let pool = WorkerPool::spawn(3, shutdown);
        let in_flight = InFlight::new();
        let done = Arc::new(AtomicU64::new(0));

        for _ in 0..20 {
            let guard = in_flight.enter();
            let done = Arc::clone(&done);
            let job = async move {
                let _guard = guard;
                done.fetch_add(1, Ordering::SeqCst);
            }
            .boxed();
            assert!(pool.dispatch(job).await);
        }

        tokio::time::timeout(Duration::from_secs(2), in_flight.idle())
            .await
            .expect("jobs should finish");
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(pool.size(), 3);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let (_tx, shutdown) = signal();
        let pool = WorkerPool::spawn(1, shutdown);
        let in_flight = InFlight::new();
        let done = Arc::new(AtomicU64::new(0));

        let guard = in_flight.enter();
        let bad: Job = async move {
            let _guard = guard;
            panic!("system exploded");
        }
        .boxed();
        assert!(pool.dispatch(bad).await);

        let guard = in_flight.enter();
        let d = Arc::clone(&done);
        let good = async move {
            let _guard = guard;
            d.fetch_add(1, Ordering::SeqCst);
        }
        .boxed();
        assert!(pool.dispatch(good).await);

        tokio::time::timeout(Duration::from_secs(2), in_flight.idle())
            .await
            .expect("second job should still run");
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_workers_exit_on_shutdown() {
        let (tx, shutdown) = signal();
        let pool = WorkerPool::spawn(4, shutdown);
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .expect("workers should exit");
    }

    #[tokio::test]
    async fn test_guard_decrements_when_job_dropped() {
        let in_flight = InFlight::new();
        let guard = in_flight.enter();
        let job: Job = async move {
            let _guard = guard;
        }
        .boxed();
        assert_eq!(in_flight.count(), 1);
        drop(job);
        assert_eq!(in_flight.count(), 0);
        in_flight.drain(Duration::from_millis(1)).await;
    }
}
