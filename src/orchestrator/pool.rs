//! Bounded thread pool for agent jobs.
//!
//! Workers block on a bounded crossbeam channel. Submission never blocks:
//! a full queue is reported to the caller. Dropping the pool closes the
//! channel and lets workers drain what is queued. Workers that exit within
//! the shutdown grace period are joined; a worker stuck in an agent that
//! ignores cancellation is detached so the drop never hangs.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::error::AgentError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Reports a worker's index when its thread leaves the job loop, including
/// by unwinding.
struct ExitSignal {
    idx: usize,
    tx: Sender<usize>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.tx.send(self.idx);
    }
}

pub(crate) struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<Option<JoinHandle<()>>>,
    exited: Receiver<usize>,
    queue_capacity: usize,
    shutdown_grace: Duration,
}

impl WorkerPool {
    pub(crate) fn start(
        name: &str,
        workers: usize,
        queue_capacity: usize,
        shutdown_grace: Duration,
    ) -> io::Result<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let (exit_tx, exited) = bounded::<usize>(workers);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let signal = ExitSignal {
                idx,
                tx: exit_tx.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || {
                    let _signal = signal;
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })?;
            handles.push(Some(handle));
        }

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            exited,
            queue_capacity,
            shutdown_grace,
        })
    }

    pub(crate) fn try_submit(&self, job: Job) -> Result<(), AgentError> {
        let Some(tx) = &self.tx else {
            return Err(AgentError::Disconnected);
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AgentError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(AgentError::Disconnected),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.tx.take());

        let deadline = Instant::now() + self.shutdown_grace;
        let mut running = self.workers.iter().filter(|h| h.is_some()).count();
        while running > 0 {
            let Ok(idx) = self.exited.recv_deadline(deadline) else {
                break;
            };
            if let Some(handle) = self.workers.get_mut(idx).and_then(Option::take) {
                let _ = handle.join();
                running -= 1;
            }
        }

        let detached = self.workers.iter_mut().filter_map(Option::take).count();
        if detached > 0 {
            warn!(
                detached,
                grace_ms = u64::try_from(self.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                "agent workers still busy at shutdown, detaching"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn runs_jobs_and_joins_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::start("test-pool", 2, 8, Duration::from_secs(5)).unwrap();
        assert_eq!(pool.size(), 2);
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.try_submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn full_queue_is_reported() {
        let pool = WorkerPool::start("test-full", 1, 1, Duration::from_secs(5)).unwrap();
        let (hold_tx, hold_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);
        pool.try_submit(Box::new(move || {
            let _ = started_tx.send(());
            let _ = hold_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        pool.try_submit(Box::new(|| {})).unwrap();
        let err = pool.try_submit(Box::new(|| {})).unwrap_err();
        assert_eq!(err, AgentError::QueueFull { capacity: 1 });

        drop(hold_tx);
    }

    #[test]
    fn stuck_worker_is_detached_on_drop() {
        let pool = WorkerPool::start("test-stuck", 2, 4, Duration::from_millis(50)).unwrap();
        let (release_tx, release_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);
        pool.try_submit(Box::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let started = Instant::now();
        drop(pool);
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(release_tx);
    }
}
