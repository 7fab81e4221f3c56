//! Serial executor - a single worker that owns state and runs closures
//! against it one at a time, in submission order.
//!
//! Every read or mutation of shared bot state is expressed as a work item
//! submitted here. The worker is the only place the state is ever touched,
//! so no lock is needed around it.
//!
//! Submitting and waiting from inside a work item deadlocks the worker.
//! Compound logic must be written in place inside a single closure.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::application::errors::ExecutorError;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Envelope<S> {
    Job(Job<S>),
    Close,
    Abort,
}

/// Handle to a serial executor. Cloning the handle shares the same worker.
pub struct SerialExecutor<S> {
    name: Arc<str>,
    jobs: mpsc::UnboundedSender<Envelope<S>>,
    closed: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

impl<S> Clone for SerialExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            jobs: self.jobs.clone(),
            closed: self.closed.clone(),
            aborted: self.aborted.clone(),
            done: self.done.clone(),
        }
    }
}

impl<S: Send + 'static> SerialExecutor<S> {
    /// Moves `state` onto a new worker thread and starts processing.
    pub fn start(name: &str, state: S) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));
        let aborted = Arc::new(AtomicBool::new(false));
        let name: Arc<str> = Arc::from(name);

        let worker = Worker {
            name: name.clone(),
            state,
            jobs: rx,
            closed: closed.clone(),
            aborted: aborted.clone(),
            done: done_tx,
        };
        std::thread::Builder::new()
            .name(format!("executor-{}", name))
            .spawn(move || worker.run())?;

        Ok(Self {
            name,
            jobs: tx,
            closed,
            aborted,
            done: done_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queues a work item without waiting for it.
    pub fn execute<F>(&self, job: F) -> Result<(), ExecutorError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if self.is_closed() {
            return Err(ExecutorError::Closed);
        }
        self.jobs
            .send(Envelope::Job(Box::new(job)))
            .map_err(|_| ExecutorError::Closed)
    }

    /// Queues a work item and waits for its result.
    pub async fn submit<F, R>(&self, job: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move |state| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job(state)));
            let _ = tx.send(result.map_err(|_| ExecutorError::Panicked));
        })?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Closed),
        }
    }

    /// Stops accepting work. Items already queued still run.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Worker {} closing", self.name);
            let _ = self.jobs.send(Envelope::Close);
        }
    }

    /// Stops the worker before its next item, dropping whatever is queued.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.jobs.send(Envelope::Abort);
    }

    /// Waits until the worker has exited.
    pub async fn join(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

struct Worker<S> {
    name: Arc<str>,
    state: S,
    jobs: mpsc::UnboundedReceiver<Envelope<S>>,
    closed: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
    done: watch::Sender<bool>,
}

impl<S> Worker<S> {
    fn run(mut self) {
        tracing::info!("Worker {} started", self.name);

        while let Some(envelope) = self.jobs.blocking_recv() {
            if self.aborted.load(Ordering::SeqCst) {
                tracing::warn!("Worker {} received kill signal", self.name);
                break;
            }
            match envelope {
                Envelope::Job(job) => {
                    let state = &mut self.state;
                    if panic::catch_unwind(AssertUnwindSafe(move || job(state))).is_err() {
                        tracing::error!("Worker {}: work item panicked", self.name);
                    }
                }
                Envelope::Close => break,
                Envelope::Abort => {
                    tracing::warn!("Worker {} received kill signal", self.name);
                    break;
                }
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        // Remaining items are dropped here, which wakes their waiters.
        self.jobs.close();
        while self.jobs.try_recv().is_ok() {}
        let _ = self.done.send(true);
        tracing::info!("Worker {} terminated", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_items_in_submission_order() {
        let executor = SerialExecutor::start("order", Vec::new()).unwrap();

        for i in 0..100 {
            executor.execute(move |v: &mut Vec<i32>| v.push(i)).unwrap();
        }
        let seen = executor.submit(|v| v.clone()).await.unwrap();

        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrent_submitters_never_lose_updates() {
        let executor = SerialExecutor::start("counter", 0u64).unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        executor
                            .submit(|n: &mut u64| {
                                let read = *n;
                                *n = read + 1;
                            })
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(executor.submit(|n| *n).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn close_drains_queued_items() {
        let executor = SerialExecutor::start("drain", ()).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();

        for i in 0..10 {
            let tx = tx.clone();
            executor
                .execute(move |_| {
                    std::thread::sleep(Duration::from_millis(2));
                    tx.send(i).unwrap();
                })
                .unwrap();
        }
        executor.close();
        executor.join().await;

        assert_eq!(rx.try_iter().count(), 10);
        assert_eq!(executor.execute(|_| {}), Err(ExecutorError::Closed));
        assert_eq!(executor.submit(|_| 1).await, Err(ExecutorError::Closed));
    }

    #[tokio::test]
    async fn abort_skips_queued_items() {
        let executor = SerialExecutor::start("abort", ()).unwrap();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (ran_tx, ran_rx) = std::sync::mpsc::channel();

        executor
            .execute(move |_| {
                let _ = gate_rx.recv();
            })
            .unwrap();
        executor
            .execute(move |_| {
                ran_tx.send(()).unwrap();
            })
            .unwrap();

        executor.abort();
        let _ = gate_tx.send(());
        executor.join().await;

        assert!(ran_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_item_does_not_kill_worker() {
        let executor = SerialExecutor::start("panic", 5).unwrap();

        let result = executor.submit(|_: &mut i32| -> i32 { panic!("boom") }).await;
        assert_eq!(result, Err(ExecutorError::Panicked));

        executor.execute(|_| panic!("boom again")).unwrap();
        assert_eq!(executor.submit(|n| *n + 1).await, Ok(6));
    }
}
