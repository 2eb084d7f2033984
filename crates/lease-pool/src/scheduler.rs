//! Per-category FIFO scheduler with unlimited fixed-interval retry
//!
//! Each category gets one worker task and one queue. The worker takes a job,
//! leases a credential for it, hands both to the dispatcher, and only then
//! takes the next job. When no credential is available it sleeps for the
//! retry interval and tries the same job again, holding the queue meanwhile.
//! Running one job at a time is what keeps completions in submission order;
//! categories never wait on each other.
//!
//! There is no attempt limit and no deadline. A job waits until a credential
//! frees up or the scheduler is shut down.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::lease::Lease;
use crate::pool::Pool;

/// Wait between allocation attempts for a job.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Retry policy for jobs waiting on a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// A unit of work that needs one credential.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub category: String,
    /// Caller's job parameters, forwarded untouched to the dispatcher
    pub payload: serde_json::Value,
}

/// Hands a leased credential to whatever performs the job.
///
/// The scheduler considers the job complete once `dispatch` returns; the
/// processor releases the credential later through `Pool::release`.
/// Uses `Pin<Box<dyn Future>>` so it can be held as `Arc<dyn Dispatcher>`.
pub trait Dispatcher: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        job: &'a Job,
        lease: &'a Lease,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

struct QueuedJob {
    job: Job,
    submitted_at: Instant,
}

/// One queue and one worker per category.
pub struct Scheduler {
    queues: HashMap<String, mpsc::UnboundedSender<QueuedJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn a worker for each category.
    pub fn spawn(
        pool: Arc<Pool>,
        dispatcher: Arc<dyn Dispatcher>,
        categories: &[String],
        policy: RetryPolicy,
    ) -> Self {
        let mut queues = HashMap::new();
        let mut workers = Vec::new();

        for category in categories {
            if queues.contains_key(category) {
                continue;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            queues.insert(category.clone(), tx);
            workers.push(tokio::spawn(run_worker(
                category.clone(),
                rx,
                pool.clone(),
                dispatcher.clone(),
                policy,
            )));
        }

        info!(
            categories = queues.len(),
            retry_interval_secs = policy.interval.as_secs(),
            "scheduler started"
        );
        Self { queues, workers }
    }

    /// Enqueue a job. Never waits; the work happens on the category's worker.
    pub fn submit(&self, job: Job) -> Result<()> {
        let queue = self
            .queues
            .get(&job.category)
            .ok_or_else(|| Error::UnknownCategory(job.category.clone()))?;

        let category = job.category.clone();
        // Counted before the send so the worker's decrement never comes first
        let depth = metrics::gauge!("scheduler_queue_depth", "category" => category.clone());
        depth.increment(1.0);
        let sent = queue.send(QueuedJob {
            job,
            submitted_at: Instant::now(),
        });
        if sent.is_err() {
            depth.decrement(1.0);
            return Err(Error::SchedulerClosed);
        }

        metrics::counter!("jobs_submitted_total", "category" => category).increment(1);
        Ok(())
    }

    /// Categories with a worker, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.queues.keys().cloned().collect();
        categories.sort();
        categories
    }

    /// Stop all workers. Queued and waiting jobs are dropped.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
        info!("scheduler stopped");
    }
}

async fn run_worker(
    category: String,
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    pool: Arc<Pool>,
    dispatcher: Arc<dyn Dispatcher>,
    policy: RetryPolicy,
) {
    info!(category, "scheduler worker started");
    while let Some(queued) = rx.recv().await {
        metrics::gauge!("scheduler_queue_depth", "category" => category.clone()).decrement(1.0);
        process_job(&category, queued, &pool, dispatcher.as_ref(), policy).await;
    }
    info!(category, "scheduler worker stopped");
}

/// Run one job to completion: lease (waiting as long as it takes), then dispatch.
async fn process_job(
    category: &str,
    queued: QueuedJob,
    pool: &Pool,
    dispatcher: &dyn Dispatcher,
    policy: RetryPolicy,
) {
    let QueuedJob { job, submitted_at } = queued;
    let started = Instant::now();
    let mut retries: u64 = 0;

    let lease = loop {
        match pool.acquire(category).await {
            Ok(Some(lease)) => break lease,
            Ok(None) => {
                retries += 1;
                warn!(
                    job_id = job.id,
                    category,
                    retries,
                    retry_in_secs = policy.interval.as_secs(),
                    "no credential available, holding queue"
                );
                metrics::counter!("scheduler_retries_total", "category" => category.to_string())
                    .increment(1);
                tokio::time::sleep(policy.interval).await;
            }
            Err(e) => {
                error!(job_id = job.id, category, error = %e, "allocation failed, dropping job");
                metrics::counter!("scheduler_jobs_failed_total", "category" => category.to_string())
                    .increment(1);
                return;
            }
        }
    };

    metrics::histogram!("lease_wait_seconds", "category" => category.to_string())
        .record(started.elapsed().as_secs_f64());
    info!(
        job_id = job.id,
        category,
        credential_id = lease.credential_id,
        retries,
        queued_secs = submitted_at.elapsed().as_secs(),
        "credential leased, dispatching job"
    );

    dispatcher.dispatch(&job, &lease).await;
    metrics::counter!("scheduler_jobs_dispatched_total", "category" => category.to_string())
        .increment(1);
}
