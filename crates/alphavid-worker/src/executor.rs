//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use alphavid_queue::{ConvertJob, JobQueue};
use alphavid_store::RecordStore;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::retry::FailureTracker;

/// How long one consume call blocks waiting for a job.
const CONSUME_BLOCK_MS: u64 = 1000;

/// Consecutive broker failures logged before suppression.
const MAX_LOGGED_FAILURES: u32 = 5;

/// Job executor that processes jobs from the queue.
///
/// Each slot holds exactly one job: a permit is acquired before a job is
/// read, so the worker never prefetches more than it can run.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn RecordStore>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: JobQueue,
        dispatcher: Dispatcher,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.slots));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            dispatcher: Arc::new(dispatcher),
            store,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run until [`JobExecutor::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} slots",
            self.consumer_name, self.config.slots
        );

        self.queue.init().await?;

        let claim_task = tokio::spawn(Self::claim_loop(
            Arc::clone(&self.queue),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.job_semaphore),
            self.consumer_name.clone(),
            self.config.claim_interval,
            self.shutdown.subscribe(),
        ));
        let sweep_task = tokio::spawn(Self::sweep_loop(
            Arc::clone(&self.store),
            self.config.sweep_interval,
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => permit
                    .map_err(|_| WorkerError::internal("job semaphore closed"))?,
            };

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                result = self.queue.consume(&self.consumer_name, CONSUME_BLOCK_MS, 1) => match result {
                    Ok(jobs) => {
                        failures.record_success();
                        self.spawn_jobs(jobs, permit);
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            error!("Error consuming jobs: {}", e);
                        }
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        sweep_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let slots = u32::try_from(self.config.slots).unwrap_or(u32::MAX);
        if tokio::time::timeout(
            self.config.shutdown_timeout,
            self.job_semaphore.acquire_many(slots),
        )
        .await
        .is_err()
        {
            warn!("In-flight jobs still running after {:?}", self.config.shutdown_timeout);
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Hand each consumed job its own slot. With a count of one there is at
    /// most one job, which takes the permit acquired for it.
    fn spawn_jobs(&self, jobs: Vec<(String, ConvertJob)>, permit: OwnedSemaphorePermit) {
        let mut permit = Some(permit);
        for (message_id, job) in jobs {
            let slot = match permit.take() {
                Some(p) => p,
                None => match Arc::clone(&self.job_semaphore).try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        // Left pending; the claim loop will pick it up
                        warn!(task_id = %job.task_id, "No free slot for consumed job");
                        continue;
                    }
                },
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                let _slot = slot;
                Self::execute_job(dispatcher, queue, message_id, job).await;
            });
        }
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(
        dispatcher: Arc<Dispatcher>,
        queue: Arc<JobQueue>,
        message_id: String,
        job: ConvertJob,
    ) {
        let task_id = job.task_id.clone();

        match dispatcher.dispatch(&job).await {
            Ok(outcome) => {
                debug!(task_id = %task_id, ?outcome, "Job finished");
                if let Err(e) = queue.ack(&message_id).await {
                    error!(task_id = %task_id, "Failed to ack job: {}", e);
                }
                if let Err(e) = queue.clear_dedup(&job).await {
                    warn!(task_id = %task_id, "Failed to clear dedup key: {}", e);
                }
            }
            Err(e) => {
                // Terminal state could not be written; leave pending for redelivery
                error!(task_id = %task_id, "Job could not be finalized: {}", e);

                let retry_count = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                let max_retries = queue.max_retries();

                if retry_count >= max_retries {
                    warn!(
                        task_id = %task_id,
                        "Job exceeded max retries ({}), moving to DLQ", max_retries
                    );
                    metrics::record_dead_lettered();
                    if let Err(dlq_err) = queue.dlq(&message_id, &job, &e.to_string()).await {
                        error!(task_id = %task_id, "Failed to move job to DLQ: {}", dlq_err);
                    }
                    if let Err(e) = queue.clear_dedup(&job).await {
                        warn!(task_id = %task_id, "Failed to clear dedup key: {}", e);
                    }
                } else {
                    info!(
                        task_id = %task_id,
                        "Job will be redelivered (attempt {}/{})", retry_count, max_retries
                    );
                }
            }
        }
    }

    /// Re-run jobs left pending by crashed workers, one free slot at a time.
    async fn claim_loop(
        queue: Arc<JobQueue>,
        dispatcher: Arc<Dispatcher>,
        semaphore: Arc<Semaphore>,
        consumer_name: String,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        continue;
                    };

                    match queue.claim_pending(&consumer_name, 1).await {
                        Ok(jobs) => {
                            failures.record_success();
                            if let Some((message_id, job)) = jobs.into_iter().next() {
                                info!(task_id = %job.task_id, "Claimed orphaned job");
                                let dispatcher = Arc::clone(&dispatcher);
                                let queue = Arc::clone(&queue);
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    Self::execute_job(dispatcher, queue, message_id, job).await;
                                });
                            }
                        }
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to claim pending jobs: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn sweep_loop(
        store: Arc<dyn RecordStore>,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => match store.sweep_expired().await {
                    Ok(0) => debug!("Expiry sweep found nothing to remove"),
                    Ok(count) => info!(count, "Expiry sweep removed records"),
                    Err(e) => warn!("Expiry sweep failed: {}", e),
                },
            }
        }
    }
}
