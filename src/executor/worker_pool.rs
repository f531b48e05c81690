//! Fixed-size worker pool with unbounded acceptance.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};
use parking_lot::Mutex;

use crate::error_handling::ExecutorError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of `size` worker threads pulling jobs from one shared queue.
///
/// `submit` never blocks: the queue is unbounded, so callers that need
/// backpressure put a [`BoundedExecutor`](super::BoundedExecutor) in front.
/// A panicking job is caught at the job boundary and its worker keeps running.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    accepted: AtomicUsize,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` threads named `<name>-<index>`.
    pub fn new(size: usize, name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(receiver))?;
            workers.push(handle);
        }
        debug!("Started worker pool '{name}' with {size} threads");
        Ok(WorkerPool {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            accepted: AtomicUsize::new(0),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tasks accepted since the pool was created.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Number of accepted tasks not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, |s| s.len())
    }

    /// Queues `task` for execution.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::ShutDown` once `shutdown` has been called. The
    /// task is dropped without running in that case.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!("Task panicked: {message}");
                ExecutorError::Panicked(message)
            });
            // The handle may have been dropped; nobody is waiting then.
            let _ = result_tx.send(result);
        });

        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(ExecutorError::ShutDown)?;
        sender.send(job).map_err(|_| ExecutorError::ShutDown)?;
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(TaskHandle { result: result_rx })
    }

    /// Stops accepting tasks. Already accepted tasks still run.
    ///
    /// With `wait`, blocks until every worker has drained the queue and
    /// exited. Calling it again is a no-op.
    pub fn shutdown(&self, wait: bool) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock());
        if wait {
            for worker in workers {
                let name = worker.thread().name().unwrap_or("worker").to_string();
                if worker.join().is_err() {
                    error!("Worker thread {name} terminated abnormally");
                }
            }
            debug!("Worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    for job in receiver.iter() {
        job();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to the result of a task submitted to a [`WorkerPool`].
pub struct TaskHandle<T> {
    result: Receiver<Result<T, ExecutorError>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has run and returns its result.
    pub fn join(self) -> Result<T, ExecutorError> {
        self.result.recv().unwrap_or(Err(ExecutorError::Cancelled))
    }

    /// True once the task has produced a result.
    pub fn is_finished(&self) -> bool {
        !self.result.is_empty()
    }
}
