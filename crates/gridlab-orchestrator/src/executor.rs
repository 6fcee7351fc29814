//! Bounded worker pool for training and evaluation runs.
//!
//! Submissions go into a bounded `mpsc` queue that a fixed number of long-lived
//! workers drain. A queue slot is reserved before the run is created, so a full
//! queue rejects the submission without leaving a stray `pending` run behind.
//!
//! Each run has exactly one writer: the worker that dequeued it. The pipeline runs
//! on the blocking pool and hands its artifact set back; the worker alone decides
//! whether to publish it or record a failure.
//!
//! A job past its deadline is cancelled cooperatively: its token is triggered, the
//! run is recorded `failed`, and the worker keeps its slot until the computation
//! notices and returns. Whatever it returns is discarded.

use crate::error::{OrchestrationError, Result};
use gridlab_abstraction::CancelToken;
use gridlab_training::{
    ArtifactSet, EvaluationRequest, Pipeline, ProgressEvent, ProgressSink, RunHandle, RunId, RunRequest, RunStore,
    TrainingError, TrainingRequest, TrainingResult,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

/// Work a run performs.
#[derive(Debug, Clone)]
pub enum Job {
    Train(TrainingRequest),
    Evaluate(EvaluationRequest),
}

impl Job {
    pub fn run_request(&self) -> RunRequest {
        match self {
            Self::Train(request) => request.run_request(),
            Self::Evaluate(request) => request.run_request(),
        }
    }

    fn execute(&self, pipeline: &Pipeline, run_id: &RunId, cancel: &CancelToken) -> TrainingResult<ArtifactSet> {
        match self {
            Self::Train(request) => pipeline.train(run_id, request, cancel),
            Self::Evaluate(request) => pipeline.evaluate(run_id, request, cancel),
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Deadline per job; `None` waits for completion.
    pub job_timeout: Option<Duration>,
}

struct QueuedJob {
    handle: RunHandle,
    job: Job,
}

#[derive(Clone)]
struct WorkerContext {
    store: Arc<RunStore>,
    pipeline: Pipeline,
    progress: Arc<dyn ProgressSink>,
    job_timeout: Option<Duration>,
}

pub struct JobExecutor {
    config: ExecutorConfig,
    sender: mpsc::Sender<QueuedJob>,
    store: Arc<RunStore>,
    progress: Arc<dyn ProgressSink>,
    workers: Vec<JoinHandle<()>>,
}

impl fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutor")
            .field("config", &self.config)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl JobExecutor {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(config: ExecutorConfig, store: Arc<RunStore>, pipeline: Pipeline) -> Self {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let progress = Arc::clone(pipeline.progress());
        let ctx = WorkerContext {
            store: Arc::clone(&store),
            pipeline,
            progress: Arc::clone(&progress),
            job_timeout: config.job_timeout,
        };

        let workers = (0..workers)
            .map(|worker| {
                let ctx = ctx.clone();
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    debug!(worker, "Worker started");
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(queued) = next else { break };
                        process(&ctx, queued).await;
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        info!(workers = config.workers, queue_capacity = config.queue_capacity, "Job executor started");
        Self { config, sender, store, progress, workers }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Create a `pending` run and queue it. Returns immediately.
    ///
    /// Fails with `QueueFull` (and creates no run) when the queue is at capacity.
    pub fn submit(&self, job: Job) -> Result<RunHandle> {
        let permit = self.sender.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => OrchestrationError::QueueFull { capacity: self.config.queue_capacity },
            mpsc::error::TrySendError::Closed(()) => OrchestrationError::ExecutorStopped,
        })?;
        let handle = self.store.begin_run(job.run_request())?;
        self.progress.on_event(ProgressEvent::Queued { run_id: handle.run_id.clone() });
        permit.send(QueuedJob { handle: handle.clone(), job });
        Ok(handle)
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker ended abnormally");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn joined<T>(result: std::result::Result<TrainingResult<T>, JoinError>) -> std::result::Result<T, String> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err(format!("job panicked: {}", panic_message(e.into_panic().as_ref()))),
        Err(e) => Err(format!("job aborted: {e}")),
    }
}

async fn process(ctx: &WorkerContext, queued: QueuedJob) {
    let QueuedJob { handle, job } = queued;
    let run_id = handle.run_id.clone();

    if let Err(e) = ctx.store.mark_running(&handle) {
        error!(run_id = %run_id, error = %e, "Could not start run");
        fail(ctx, &handle, &e.to_string());
        return;
    }
    ctx.progress.on_event(ProgressEvent::Started { run_id: run_id.clone() });

    let pipeline = ctx.pipeline.clone();
    let task_run_id = run_id.clone();
    let cancel = CancelToken::new();
    let task_cancel = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || job.execute(&pipeline, &task_run_id, &task_cancel));
    let outcome = match ctx.job_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(result) => joined(result),
            Err(_) => {
                cancel.cancel();
                fail(ctx, &handle, &format!("job timed out after {}s", limit.as_secs_f64()));
                match joined(task.await) {
                    Ok(_) => debug!(run_id = %run_id, "Discarded result of timed-out run"),
                    Err(message) => debug!(run_id = %run_id, error = %message, "Timed-out run stopped"),
                }
                return;
            }
        },
        None => joined(task.await),
    };

    let outcome = match outcome {
        Ok(artifacts) => {
            let store = Arc::clone(&ctx.store);
            let publish_handle = handle.clone();
            joined(tokio::task::spawn_blocking(move || store.mark_succeeded(&publish_handle, artifacts)).await)
                .map(|_| ())
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => ctx.progress.on_event(ProgressEvent::Finished { run_id }),
        Err(message) => fail(ctx, &handle, &message),
    }
}

fn fail(ctx: &WorkerContext, handle: &RunHandle, message: &str) {
    match ctx.store.mark_failed(handle, message) {
        Ok(_) => {}
        // Already terminal, e.g. a failed publish recorded by the store itself.
        Err(TrainingError::InvalidTransition { from, .. }) => {
            debug!(run_id = %handle.run_id, status = %from, "Run already finished");
        }
        Err(e) => error!(run_id = %handle.run_id, error = %e, "Could not record run failure"),
    }
    ctx.progress.on_event(ProgressEvent::Failed { run_id: handle.run_id.clone(), error: message.to_string() });
}
