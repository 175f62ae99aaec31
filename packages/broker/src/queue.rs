//! One named queue stored in SurrealDB.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use jobflow_core::{DoneCallback, Job, JobId, JobStatus, Message};
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::SurrealConfig;
use crate::{BrokerError, BrokerFuture, JobHandler, QueueHandle};

/// Internal record type for SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    queue: String,
    data: serde_json::Value,
    name: String,
    topic: String,
    status: JobStatus,
    #[serde(default)]
    attempts: u32,
    /// Enqueue time in nanoseconds, the FIFO order key.
    #[serde(default)]
    seq: i64,
    created_at: DateTime<Utc>,
}

impl JobRecord {
    fn new(queue: &str, job: Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            queue: queue.to_string(),
            data: job.data.into_value(),
            name: job.name,
            topic: job.topic,
            status: JobStatus::Waiting,
            attempts: 0,
            seq: job.created_at.timestamp_nanos_opt().unwrap_or_default(),
            created_at: job.created_at,
        }
    }

    fn to_job(&self) -> Result<Job, BrokerError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| BrokerError::Query(format!("Bad job id {}: {}", self.job_id, e)))?;
        let data = Message::from_value(self.data.clone()).ok_or_else(|| {
            BrokerError::Query(format!("Job {} payload is not an object", self.job_id))
        })?;
        Ok(Job {
            id,
            data,
            name: self.name.clone(),
            topic: self.topic.clone(),
            created_at: self.created_at,
        })
    }
}

/// History record for finished jobs.
#[derive(Debug, Serialize, Deserialize)]
struct JobHistoryRecord {
    job_id: String,
    queue: String,
    name: String,
    topic: String,
    final_status: JobStatus,
    attempts: u32,
    error: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

/// A live handle on one named queue.
pub struct SurrealQueue {
    name: String,
    db: Surreal<Any>,
    config: SurrealConfig,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SurrealQueue {
    pub(crate) fn new(name: String, db: Surreal<Any>, config: SurrealConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            db,
            config,
            shutdown,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Count this queue's jobs in `status`.
    pub async fn count(&self, status: JobStatus) -> Result<usize, BrokerError> {
        count_jobs(&self.db, &self.name, status).await
    }
}

async fn count_jobs(
    db: &Surreal<Any>,
    queue: &str,
    status: JobStatus,
) -> Result<usize, BrokerError> {
    let mut result = db
        .query("SELECT count() AS count FROM job WHERE queue = $queue AND status = $status GROUP ALL")
        .bind(("queue", queue.to_string()))
        .bind(("status", status))
        .await?;

    #[derive(Deserialize)]
    struct Count {
        count: i64,
    }

    let counts: Vec<Count> = result.take(0)?;
    Ok(counts.first().map_or(0, |c| c.count.max(0) as usize))
}

/// Claim the oldest waiting job of `queue`, if any.
///
/// The update re-checks the status, so a job claimed concurrently by another
/// worker is skipped and the next candidate is tried.
async fn claim_next(db: &Surreal<Any>, queue: &str) -> Result<Option<JobRecord>, BrokerError> {
    loop {
        let mut result = db
            .query("SELECT * FROM job WHERE queue = $queue AND status = 'waiting' ORDER BY seq ASC LIMIT 1")
            .bind(("queue", queue.to_string()))
            .await?;
        let candidates: Vec<JobRecord> = result.take(0)?;
        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let mut result = db
            .query("UPDATE type::thing('job', $id) SET status = 'active', attempts += 1 WHERE status = 'waiting' RETURN AFTER")
            .bind(("id", candidate.job_id.clone()))
            .await?;
        let claimed: Vec<JobRecord> = result.take(0)?;
        if let Some(record) = claimed.into_iter().next() {
            return Ok(Some(record));
        }
    }
}

/// Put an undelivered job back in the waiting state without counting the attempt.
async fn release(db: &Surreal<Any>, record: &JobRecord) -> Result<(), BrokerError> {
    db.query("UPDATE type::thing('job', $id) SET status = 'waiting', attempts = $attempts")
        .bind(("id", record.job_id.clone()))
        .bind(("attempts", record.attempts.saturating_sub(1)))
        .await?
        .check()?;
    Ok(())
}

/// Record the outcome of one delivery.
async fn finish(
    db: &Surreal<Any>,
    record: &JobRecord,
    outcome: Result<(), String>,
    max_attempts: u32,
) -> Result<(), BrokerError> {
    if let Err(error) = &outcome
        && record.attempts < max_attempts
    {
        tracing::warn!(
            "Job {} failed (attempt {}), requeueing: {}",
            record.job_id,
            record.attempts,
            error
        );
        db.query("UPDATE type::thing('job', $id) SET status = 'waiting'")
            .bind(("id", record.job_id.clone()))
            .await?
            .check()?;
        return Ok(());
    }

    let (final_status, error) = match outcome {
        Ok(()) => (JobStatus::Completed, None),
        Err(error) => (JobStatus::Failed, Some(error)),
    };

    let history = JobHistoryRecord {
        job_id: record.job_id.clone(),
        queue: record.queue.clone(),
        name: record.name.clone(),
        topic: record.topic.clone(),
        final_status,
        attempts: record.attempts,
        error,
        created_at: record.created_at,
        finished_at: Utc::now(),
    };

    let _: Option<serde_json::Value> = db.create("job_history").content(history).await?;
    let _: Option<JobRecord> = db.delete(("job", record.job_id.clone())).await?;

    tracing::debug!(
        "Job {} on queue {} archived as {}",
        record.job_id,
        record.queue,
        final_status.as_str()
    );

    Ok(())
}

/// Claim jobs one at a time and hand them to `handler` until shut down.
async fn work_loop(
    db: Surreal<Any>,
    queue: String,
    config: SurrealConfig,
    handler: JobHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let record = match claim_next(&db, &queue).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
            Err(e) => {
                tracing::warn!("Failed to poll queue {}: {}", queue, e);
                tokio::time::sleep(config.poll_interval).await;
                continue;
            }
        };

        let job = match record.to_job() {
            Ok(job) => job,
            Err(e) => {
                if let Err(e) = finish(&db, &record, Err(e.to_string()), 0).await {
                    tracing::warn!("Failed to archive job {}: {}", record.job_id, e);
                }
                continue;
            }
        };

        tracing::debug!("Delivering job {} from queue {}", record.job_id, queue);

        let (tx, rx) = oneshot::channel();
        let done = DoneCallback::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        handler(job, done);

        // A dropped callback means the consumer went away: hand the job back
        // and stop delivering to it.
        let Ok(outcome) = rx.await else {
            tracing::warn!(
                "Job {} abandoned by consumer of queue {}, returning it",
                record.job_id,
                queue
            );
            if let Err(e) = release(&db, &record).await {
                tracing::warn!("Failed to return job {}: {}", record.job_id, e);
            }
            break;
        };

        if let Err(e) = finish(&db, &record, outcome, config.max_attempts).await {
            tracing::warn!("Failed to finish job {}: {}", record.job_id, e);
        }
    }

    tracing::debug!("Worker for queue {} stopped", queue);
}

impl QueueHandle for SurrealQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, job: Job) -> BrokerFuture<()> {
        let db = self.db.clone();
        let record = JobRecord::new(&self.name, job);
        let closed = *self.shutdown.borrow();
        let name = self.name.clone();
        Box::pin(async move {
            if closed {
                return Err(BrokerError::Closed(name));
            }
            let job_id = record.job_id.clone();
            let created: Option<JobRecord> = db.create(("job", job_id.clone())).content(record).await?;
            created.ok_or_else(|| BrokerError::Query(format!("Failed to create job {}", job_id)))?;
            tracing::debug!("Job {} added to queue {}", job_id, name);
            Ok(())
        })
    }

    fn process(&self, handler: JobHandler) -> BrokerFuture<()> {
        if *self.shutdown.borrow() {
            let name = self.name.clone();
            return Box::pin(async move { Err(BrokerError::Closed(name)) });
        }

        let mut spawned = Vec::with_capacity(self.config.concurrency);
        for _ in 0..self.config.concurrency {
            spawned.push(tokio::spawn(work_loop(
                self.db.clone(),
                self.name.clone(),
                self.config.clone(),
                handler.clone(),
                self.shutdown.subscribe(),
            )));
        }

        match self.workers.lock() {
            Ok(mut workers) => workers.extend(spawned),
            Err(poisoned) => poisoned.into_inner().extend(spawned),
        }
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BrokerFuture<()> {
        let _ = self.shutdown.send(true);
        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        let name = self.name.clone();
        Box::pin(async move {
            for worker in workers {
                let _ = worker.await;
            }
            tracing::info!("Queue {} disconnected", name);
            Ok(())
        })
    }
}

impl Drop for SurrealQueue {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

impl std::fmt::Debug for SurrealQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealQueue").field("name", &self.name).finish()
    }
}
