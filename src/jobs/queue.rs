//! Job queue: FIFO dispatch of named jobs onto the tokio pool.
//!
//! Contract:
//! - [`JobQueueHandle::enqueue`] runs the job exactly once, later. Jobs from
//!   one caller are dispatched in the order they were enqueued. Repeated
//!   enqueues of the same job are never merged.
//! - [`JobQueueHandle::run_now`] runs a job as its own task and hands back a
//!   [`RunHandle`] the caller awaits with a timeout and the shutdown token.
//!   The caller's stack never nests the other job.
//! - [`JobQueueHandle::enqueue_after`] enqueues once a delay has elapsed.
//!
//! A single dispatcher task drains the channel and spawns each job into a
//! `JoinSet`; jobs therefore run concurrently once dispatched.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{error::AppError, router::RouterContext};

/// Boxed future returned by [`Job::run`].
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A named unit of work with one entry point.
pub trait Job: Send + 'static {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    /// Consume the job and return its work as a boxed future.
    fn run(self: Box<Self>, ctx: JobContext) -> JobFuture;
}

/// What a running job gets to work with.
#[derive(Clone)]
pub struct JobContext {
    pub router: Arc<RouterContext>,
    pub queue: JobQueueHandle,
    /// Unique per execution, for log correlation.
    pub run_id: Uuid,
}

// ── handle ───────────────────────────────────────────────────────────────────

/// Cloneable client side of the queue.
#[derive(Clone)]
pub struct JobQueueHandle {
    tx: mpsc::Sender<Box<dyn Job>>,
    router: Arc<RouterContext>,
}

impl JobQueueHandle {
    /// Queue `job` for asynchronous execution.
    pub fn enqueue(&self, job: Box<dyn Job>) -> Result<(), AppError> {
        let name = job.name().to_string();
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::Scheduler(format!("job queue full, dropped '{name}'"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Scheduler(format!("job queue stopped, dropped '{name}'"))
            }
        })?;
        debug!(job = %name, "enqueued");
        Ok(())
    }

    /// Queue `job` after `delay`. Dropped silently on shutdown.
    pub fn enqueue_after(&self, job: Box<dyn Job>, delay: Duration) {
        let queue = self.clone();
        let shutdown = self.router.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(job = %job.name(), "delayed job dropped on shutdown");
                }
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = queue.enqueue(job) {
                        warn!(error = %e, "delayed enqueue failed");
                    }
                }
            }
        });
    }

    /// Start `job` immediately on its own task.
    pub fn run_now(&self, job: Box<dyn Job>) -> RunHandle {
        let name = job.name().to_string();
        let ctx = self.context();
        let handle = tokio::spawn(execute(job, ctx));
        RunHandle { name, handle }
    }

    fn context(&self) -> JobContext {
        JobContext {
            router: self.router.clone(),
            queue: self.clone(),
            run_id: Uuid::new_v4(),
        }
    }
}

/// A job started with [`JobQueueHandle::run_now`].
pub struct RunHandle {
    name: String,
    handle: JoinHandle<Result<(), AppError>>,
}

impl RunHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the job. The task is aborted on timeout or cancellation.
    pub async fn wait(self, timeout: Duration, shutdown: &CancellationToken) -> Result<(), AppError> {
        let RunHandle { name, mut handle } = self;
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                handle.abort();
                Err(AppError::Scheduler(format!("'{name}' cancelled by shutdown")))
            }
            _ = tokio::time::sleep(timeout) => {
                handle.abort();
                Err(AppError::Scheduler(format!("'{name}' timed out after {}s", timeout.as_secs())))
            }
            res = &mut handle => match res {
                Ok(r) => r,
                Err(e) => Err(AppError::Scheduler(format!("'{name}' panicked: {e}"))),
            },
        }
    }
}

// ── queue ────────────────────────────────────────────────────────────────────

pub struct JobQueue;

impl JobQueue {
    /// Spawn the dispatcher. It stops when the router's shutdown token is
    /// cancelled; jobs still running at that point are aborted.
    pub fn start(router: Arc<RouterContext>) -> (JobQueueHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(router.config.jobs.queue_capacity);
        let handle = JobQueueHandle { tx, router };
        let dispatcher = tokio::spawn(dispatch(rx, handle.clone()));
        (handle, dispatcher)
    }
}

async fn dispatch(mut rx: mpsc::Receiver<Box<dyn Job>>, queue: JobQueueHandle) {
    let shutdown = queue.router.shutdown.clone();
    let mut running: JoinSet<()> = JoinSet::new();

    info!("job queue running");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(running = running.len(), "job queue shutting down");
                running.shutdown().await;
                break;
            }

            Some(job) = rx.recv() => {
                let name = job.name().to_string();
                let ctx = queue.context();
                running.spawn(async move {
                    if let Err(e) = execute(job, ctx).await {
                        error!(job = %name, error = %e, "job failed");
                    }
                });
            }

            Some(res) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = res {
                    error!("job panicked: {e}");
                }
            }
        }
    }
}

async fn execute(job: Box<dyn Job>, ctx: JobContext) -> Result<(), AppError> {
    let span = info_span!("job", name = %job.name(), run = %ctx.run_id.simple());
    async move {
        debug!("job started");
        let res = job.run(ctx).await;
        debug!(ok = res.is_ok(), "job finished");
        res
    }
    .instrument(span)
    .await
}
