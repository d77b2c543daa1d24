//! Controller task queue.
//!
//! A single worker thread owns a piece of state `S` and runs submitted
//! closures against it, one at a time, in submission order. Nothing else
//! touches `S`, so whatever lives inside (the controller, the socket table)
//! needs no locking and can never see two operations interleave.
//!
//! ```
//! use nfc_p2p::TaskQueue;
//!
//! let (queue, worker) = TaskQueue::start("counter", 0u32).unwrap();
//! for _ in 0..3 {
//!     assert!(queue.submit(|n| *n += 1));
//! }
//! queue.shutdown();
//! assert_eq!(worker.join(), Some(3));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{Error, Result};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Job<S> {
    Run(Task<S>),
    Stop,
}

/// Submission side of the queue. Cheap to clone.
pub struct TaskQueue<S> {
    tx: mpsc::UnboundedSender<Job<S>>,
    closed: Arc<AtomicBool>,
}

impl<S> Clone for TaskQueue<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<S> std::fmt::Debug for TaskQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("running", &self.is_running())
            .finish()
    }
}

/// The worker thread behind a [`TaskQueue`].
pub struct Worker<S> {
    thread: Option<thread::JoinHandle<S>>,
    stopped: Option<oneshot::Receiver<()>>,
}

impl<S: Send + 'static> TaskQueue<S> {
    /// Start a worker thread owning `state`.
    pub fn start(name: &str, state: S) -> Result<(Self, Worker<S>)> {
        Self::spawn(name, move |_| state)
    }

    /// Start a worker thread whose state is built on the worker itself.
    ///
    /// `init` receives a handle to the queue so the state can submit
    /// follow-up work to itself.
    pub fn spawn<F>(name: &str, init: F) -> Result<(Self, Worker<S>)>
    where
        F: FnOnce(TaskQueue<S>) -> S + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<S>>();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let queue = Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        let own = queue.clone();
        let thread_name = name.to_owned();

        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let closed = Arc::clone(&own.closed);
                let mut state = init(own);
                debug!("{}: worker running", thread_name);
                while let Some(job) = rx.blocking_recv() {
                    match job {
                        Job::Run(task) => task(&mut state),
                        Job::Stop => break,
                    }
                }
                closed.store(true, Ordering::Release);
                // Anything queued behind the sentinel is dropped here, which
                // closes its completion channel.
                drop(rx);
                debug!("{}: worker stopped", thread_name);
                let _ = stopped_tx.send(());
                state
            })
            .map_err(|e| {
                error!("Failed to spawn task queue worker: {}", e);
                Error::Busy
            })?;

        Ok((
            queue,
            Worker {
                thread: Some(thread),
                stopped: Some(stopped_rx),
            },
        ))
    }
}

impl<S> TaskQueue<S> {
    /// Enqueue a task behind everything submitted so far.
    ///
    /// Returns false if the queue has been shut down or the worker is gone;
    /// the task is dropped without running.
    pub fn submit(&self, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(Job::Run(Box::new(task))).is_ok()
    }

    /// Like [`submit`](Self::submit), mapping rejection to [`Error::Busy`].
    pub fn try_submit(&self, task: impl FnOnce(&mut S) + Send + 'static) -> Result<()> {
        if self.submit(task) {
            Ok(())
        } else {
            Err(Error::Busy)
        }
    }

    /// Stop the worker once every task submitted before this call has run.
    ///
    /// Returns false if the queue was already shut down.
    pub fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.send(Job::Stop).is_ok()
    }

    /// Whether submissions are still accepted.
    pub fn is_running(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

impl<S> Worker<S> {
    /// Block until the worker exits and hand back its state.
    ///
    /// Returns `None` if a task panicked, which takes the worker down.
    pub fn join(mut self) -> Option<S> {
        self.thread.take().and_then(|t| t.join().ok())
    }

    /// Wait for the worker to exit without blocking the async runtime.
    pub async fn stopped(&mut self) {
        if let Some(rx) = self.stopped.take() {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let (queue, worker) = TaskQueue::start("test-order", Vec::new()).unwrap();
        for i in 0..100 {
            assert!(queue.submit(move |log: &mut Vec<i32>| log.push(i)));
        }
        assert!(queue.shutdown());
        let log = worker.join().unwrap();
        assert_eq!(log, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let (queue, worker) = TaskQueue::start("test-closed", 0u8).unwrap();
        assert!(queue.shutdown());
        assert!(!queue.submit(|n| *n += 1));
        assert_eq!(queue.try_submit(|n| *n += 1), Err(Error::Busy));
        assert!(!queue.shutdown());
        assert_eq!(worker.join(), Some(0));
    }

    #[test]
    fn test_shutdown_drains_prior_tasks() {
        let (queue, worker) = TaskQueue::start("test-drain", 0u32).unwrap();
        queue.submit(|n| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            *n += 1;
        });
        queue.submit(|n| *n += 1);
        queue.shutdown();
        assert_eq!(worker.join(), Some(2));
    }

    #[test]
    fn test_state_can_resubmit_to_itself() {
        struct Chain {
            queue: TaskQueue<Chain>,
            hops: u32,
        }
        let (queue, worker) =
            TaskQueue::<Chain>::spawn("test-chain", |queue| Chain { queue, hops: 0 }).unwrap();
        queue.submit(|c: &mut Chain| {
            c.hops += 1;
            c.queue.submit(|c| {
                c.hops += 1;
                c.queue.shutdown();
            });
        });
        let chain = worker.join().unwrap();
        assert_eq!(chain.hops, 2);
    }
}
