//! In-process job scheduler.
//!
//! Implements the queue-runtime contract the pipeline depends on:
//! at-least-once execution, per-job attempt counting, delay-based
//! scheduling for backoff and staggered fan-out, timeout enforcement and
//! terminal-failure hooks. Jobs flow through one channel per lane; a worker
//! pool per lane pulls and executes them to completion.
//!
//! A job that exhausts its attempts runs its terminal hook exactly once and
//! is never re-enqueued afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::ContentStatus;

use super::policy::Lane;
use super::{dispatch, FollowUp, Job, JobError, JobPayload, PipelineContext};

/// Result of submitting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued(Uuid),
    /// A non-terminal job with the same uniqueness key already exists.
    Duplicate,
}

impl SubmitOutcome {
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::Enqueued(id) => Some(*id),
            Self::Duplicate => None,
        }
    }
}

struct Inner {
    ctx: Arc<PipelineContext>,
    lanes: HashMap<Lane, mpsc::UnboundedSender<Job>>,
    active_keys: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    idle: Notify,
    cancel: CancellationToken,
}

/// Handle to the running worker pools.
pub struct Scheduler {
    inner: Arc<Inner>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    /// Build the scheduler and spawn its workers.
    pub fn start(ctx: Arc<PipelineContext>) -> Self {
        let workers_per_lane = ctx.config.queue.workers_per_lane;
        let cancel = CancellationToken::new();
        let mut lanes = HashMap::new();
        let mut receivers = Vec::new();
        for lane in Lane::ALL {
            let (tx, rx) = mpsc::unbounded_channel::<Job>();
            lanes.insert(lane, tx);
            receivers.push((lane, rx));
        }

        let inner = Arc::new(Inner {
            ctx,
            lanes,
            active_keys: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            cancel,
        });

        let mut handles = Vec::new();
        for (lane, rx) in receivers {
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            for index in 1..=workers_per_lane {
                let inner = Arc::clone(&inner);
                let rx = Arc::clone(&rx);
                let span = info_span!("worker", lane = lane.as_str(), worker = index);
                handles.push(tokio::spawn(
                    async move {
                        debug!("worker started");
                        loop {
                            let job = {
                                let mut rx = rx.lock().await;
                                tokio::select! {
                                    _ = inner.cancel.cancelled() => None,
                                    job = rx.recv() => job,
                                }
                            };
                            let Some(job) = job else { break };
                            run_job(&inner, job).await;
                        }
                        debug!("worker stopped");
                    }
                    .instrument(span),
                ));
            }
        }

        Self {
            inner,
            handles: Mutex::new(handles),
        }
    }

    /// Submit a job for immediate execution.
    pub fn submit(&self, payload: JobPayload) -> SubmitOutcome {
        submit_with_delay(&self.inner, payload, Duration::ZERO)
    }

    /// Submit a job to run after a delay.
    pub fn submit_after(&self, payload: JobPayload, delay: Duration) -> SubmitOutcome {
        submit_with_delay(&self.inner, payload, delay)
    }

    /// Resolve once no job is queued, delayed or running. Test and
    /// drain-on-shutdown aid.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop all workers. In-flight handlers finish their current await
    /// point; queued jobs are dropped.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Wait for all worker tasks to exit after [`Scheduler::shutdown`].
    pub async fn wait_for_shutdown(&self) {
        let handles: Vec<_> = {
            let mut handles = self.handles.lock().expect("handle list poisoned");
            handles.drain(..).collect()
        };
        futures::future::join_all(handles)
            .await
            .into_iter()
            .for_each(|result| {
                if let Err(error) = result {
                    warn!(%error, "worker task panicked");
                }
            });
    }
}

fn submit_with_delay(inner: &Arc<Inner>, payload: JobPayload, delay: Duration) -> SubmitOutcome {
    if let Some(key) = payload.uniqueness_key() {
        let mut keys = inner.active_keys.lock().expect("uniqueness lock poisoned");
        if keys.contains(&key) && !payload.force() {
            info!(
                kind = payload.kind().as_str(),
                uniqueness_key = %key,
                "duplicate job skipped"
            );
            return SubmitOutcome::Duplicate;
        }
        keys.insert(key);
    }
    let job = Job::new(payload);
    let id = job.id;
    enqueue(inner, job, delay);
    SubmitOutcome::Enqueued(id)
}

fn enqueue(inner: &Arc<Inner>, job: Job, delay: Duration) {
    inner.in_flight.fetch_add(1, Ordering::SeqCst);
    if delay.is_zero() {
        deliver(inner, job);
        return;
    }
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::select! {
            _ = inner.cancel.cancelled() => finish_one(&inner),
            _ = tokio::time::sleep(delay) => deliver(&inner, job),
        }
    });
}

fn deliver(inner: &Arc<Inner>, job: Job) {
    let lane = job.kind().lane();
    let sender = inner.lanes.get(&lane).expect("lane channel missing");
    if sender.send(job).is_err() {
        warn!(lane = lane.as_str(), "job dropped: scheduler stopped");
        finish_one(inner);
    }
}

fn finish_one(inner: &Arc<Inner>) {
    if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
        inner.idle.notify_waiters();
    }
}

fn release_key(inner: &Arc<Inner>, payload: &JobPayload) {
    if let Some(key) = payload.uniqueness_key() {
        inner
            .active_keys
            .lock()
            .expect("uniqueness lock poisoned")
            .remove(&key);
    }
}

async fn run_job(inner: &Arc<Inner>, job: Job) {
    let policy = job.kind().policy();
    let span = info_span!(
        "job",
        job.id = %job.id,
        job.kind = job.kind().as_str(),
        job.attempt = job.attempt,
    );

    let outcome = match tokio::time::timeout(policy.timeout, dispatch(&inner.ctx, &job))
        .instrument(span.clone())
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(JobError::Timeout),
    };

    match outcome {
        Ok(completion) => {
            release_key(inner, &job.payload);
            span.in_scope(|| {
                info!(followups = completion.followups.len(), "job completed");
            });
            for FollowUp { payload, delay } in completion.followups {
                // Duplicate followups (an already-active singleton) are
                // skipped with a log, same as external submissions.
                let _ = submit_with_delay(inner, payload, delay);
            }
        }
        Err(err) => handle_failure(inner, job, err).instrument(span).await,
    }
    finish_one(inner);
}

async fn handle_failure(inner: &Arc<Inner>, mut job: Job, err: JobError) {
    let policy = job.kind().policy();
    if err.is_retryable() && job.attempt < policy.max_attempts {
        let backoff = policy.backoff_delay(job.attempt);
        // A provider retry-after hint can stretch, never shrink, the delay.
        let delay = err.retry_after().map_or(backoff, |hint| hint.max(backoff));
        warn!(
            error = %err,
            attempt = job.attempt,
            max_attempts = policy.max_attempts,
            delay_secs = delay.as_secs(),
            "job failed, scheduling retry"
        );
        job.attempt += 1;
        enqueue(inner, job, delay);
        return;
    }

    // Terminal: run the compensating hook once, never re-enqueue.
    if let Some(entity_id) = job.payload.target_entity() {
        if let Err(repo_err) = inner
            .ctx
            .repo
            .set_status(entity_id, ContentStatus::Failed)
            .await
        {
            error!(%entity_id, error = %repo_err, "failed to mark target entity as failed");
        }
    }
    error!(
        error = %err,
        attempts = job.attempt,
        tags = ?job.tags,
        permanently_failed = true,
        "job permanently failed"
    );
    release_key(inner, &job.payload);
}
