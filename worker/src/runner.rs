// ==============================================================================
// runner.rs - Worker Poll Loop
// ==============================================================================
// Description: Polls the import queue and runs claimed tasks on a bounded pool
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use contact_import::config::WorkerConfig;
use contact_import::models::{ImportTask, IMPORT_TASK_NAME};
use contact_import::queue::{Delivery, FailureDisposition, QueueError, TaskQueue};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, field, info, info_span, warn, Instrument, Span};

use crate::job_processor::JobProcessor;

/// How a single delivery was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { inserted: u64 },
    Failed(FailureDisposition),
    /// The queue could not record the result; the task stays in flight
    Unsettled,
}

pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    processor: Arc<JobProcessor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(queue: Arc<dyn TaskQueue>, processor: Arc<JobProcessor>, config: WorkerConfig) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    /// Poll until `shutdown` resolves, then wait for in-flight tasks
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        match self.queue.recover_in_flight(IMPORT_TASK_NAME).await {
            Ok(0) => {}
            Ok(n) => info!("Recovered {} tasks left in flight by a previous run", n),
            Err(e) => error!("Failed to recover in-flight tasks: {}", e),
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            "Worker ready, waiting for import tasks..."
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!("Import task panicked: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = semaphore.clone().acquire_owned() => permit.context("Worker semaphore closed")?,
            };

            let idle = match self.poll_once().await {
                Ok(Some(delivery)) => {
                    let queue = self.queue.clone();
                    let processor = self.processor.clone();
                    tasks.spawn(async move {
                        let outcome = settle(queue.as_ref(), &processor, delivery).await;
                        drop(permit);
                        outcome
                    });
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!("Failed to dequeue import task: {}", e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!("Shutting down, waiting for {} in-flight tasks", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Import task panicked: {}", e);
            }
        }
        info!("Worker stopped");
        Ok(())
    }

    async fn poll_once(&self) -> Result<Option<Delivery>, QueueError> {
        match self.queue.promote_due(IMPORT_TASK_NAME).await {
            Ok(0) => {}
            Ok(n) => info!("Promoted {} delayed retries", n),
            Err(e) => warn!("Failed to promote delayed retries: {}", e),
        }
        self.queue.dequeue(IMPORT_TASK_NAME).await
    }
}

/// Run one delivery to completion and report the result to the queue
pub async fn settle(queue: &dyn TaskQueue, processor: &JobProcessor, delivery: Delivery) -> TaskOutcome {
    let envelope = &delivery.envelope;
    let span = info_span!(
        "import_task",
        job_id = field::Empty,
        source = field::Empty,
        task_id = %envelope.id,
        attempt = envelope.attempt,
    );

    async move {
        let task: ImportTask = match serde_json::from_value(delivery.envelope.payload.clone()) {
            Ok(task) => task,
            Err(e) => {
                error!("Malformed import task payload: {}", e);
                return report_failure(queue, &delivery, &format!("Malformed task payload: {}", e)).await;
            }
        };

        let span = Span::current();
        span.record("job_id", task.job_id.as_str());
        span.record("source", task.source.as_str());

        match processor.process(&task).await {
            Ok(outcome) => match queue.ack(&delivery).await {
                Ok(()) => TaskOutcome::Completed {
                    inserted: outcome.inserted,
                },
                Err(e) => {
                    error!("Failed to acknowledge job {}: {}", task.job_id, e);
                    TaskOutcome::Unsettled
                }
            },
            Err(e) => {
                error!(stage = %e.stage(), "Import task failed: {}", e);
                let outcome = report_failure(queue, &delivery, &e.to_string()).await;

                // No delivery will read the artifact again
                if outcome == TaskOutcome::Failed(FailureDisposition::DeadLettered)
                    && processor.discard(&task).await
                {
                    info!(artifact_key = %task.artifact_key, "Removed artifact of dead-lettered job");
                }
                outcome
            }
        }
    }
    .instrument(span)
    .await
}

async fn report_failure(queue: &dyn TaskQueue, delivery: &Delivery, reason: &str) -> TaskOutcome {
    match queue.fail(delivery, reason).await {
        Ok(disposition) => {
            match &disposition {
                FailureDisposition::Retrying { attempt, run_at } => {
                    warn!("Retry {} scheduled for {}", attempt, run_at)
                }
                FailureDisposition::DeadLettered => {
                    error!("Giving up after {} attempts", delivery.envelope.attempt)
                }
            }
            TaskOutcome::Failed(disposition)
        }
        Err(e) => {
            error!("Failed to report task failure: {}", e);
            TaskOutcome::Unsettled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contact_import::models::JobId;
    use contact_import::testing::{MemoryContactStore, MemoryQueue, MemoryStorage};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        storage: Arc<MemoryStorage>,
        contacts: Arc<MemoryContactStore>,
        queue: Arc<MemoryQueue>,
        processor: Arc<JobProcessor>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let contacts = Arc::new(MemoryContactStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let processor = Arc::new(JobProcessor::new(storage.clone(), contacts.clone()));
        Harness {
            storage,
            contacts,
            queue,
            processor,
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            concurrency: 2,
            worker_id: "worker-test".to_string(),
        }
    }

    async fn stage_and_enqueue(h: &Harness, job: &str, body: &'static [u8]) {
        let job_id = JobId::from(job.to_string());
        let artifact_key = job_id.artifact_key(None);
        h.storage.insert(&artifact_key, body, "application/json");
        let task = ImportTask {
            job_id,
            source: "acme".to_string(),
            artifact_key,
        };
        h.queue
            .enqueue(IMPORT_TASK_NAME, serde_json::to_value(task).unwrap())
            .await
            .unwrap();
    }

    async fn wait_for_rows(contacts: &MemoryContactStore, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while contacts.rows().len() < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_settle_acks_success() {
        let h = harness();
        stage_and_enqueue(&h, "1-settleok", br#"[{"name":"Ann","email":"ann@x.io"}]"#).await;

        let delivery = h.queue.dequeue(IMPORT_TASK_NAME).await.unwrap().unwrap();
        let outcome = settle(h.queue.as_ref(), &h.processor, delivery).await;

        assert_eq!(outcome, TaskOutcome::Completed { inserted: 1 });
        assert_eq!(h.queue.in_flight_len(), 0);
        assert_eq!(h.queue.delayed_len(), 0);
    }

    #[tokio::test]
    async fn test_failures_retry_then_dead_letter() {
        let h = harness();
        stage_and_enqueue(&h, "1-alwaysbad", br#"[{"name":"Bob"}]"#).await;

        let first = h.queue.dequeue(IMPORT_TASK_NAME).await.unwrap().unwrap();
        let outcome = settle(h.queue.as_ref(), &h.processor, first).await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed(FailureDisposition::Retrying { attempt: 2, .. })
        ));
        assert_eq!(h.queue.delayed_len(), 1);

        let mut last = outcome;
        while h.queue.promote_due(IMPORT_TASK_NAME).await.unwrap() > 0 {
            let delivery = h.queue.dequeue(IMPORT_TASK_NAME).await.unwrap().unwrap();
            last = settle(h.queue.as_ref(), &h.processor, delivery).await;
        }

        assert_eq!(last, TaskOutcome::Failed(FailureDisposition::DeadLettered));
        let dead = h.queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].last_error.as_deref().unwrap().contains("1-alwaysbad"));
        assert!(h.contacts.rows().is_empty());
        assert!(h.storage.keys().is_empty());
        assert_eq!(h.storage.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_artifact_kept_while_retries_remain() {
        let h = harness();
        stage_and_enqueue(&h, "1-retrylater", br#"[{"name":"Bob"}]"#).await;

        let delivery = h.queue.dequeue(IMPORT_TASK_NAME).await.unwrap().unwrap();
        let outcome = settle(h.queue.as_ref(), &h.processor, delivery).await;

        assert!(matches!(outcome, TaskOutcome::Failed(FailureDisposition::Retrying { .. })));
        assert_eq!(h.storage.keys(), vec!["import-1-retrylater.json".to_string()]);
        assert_eq!(h.storage.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_survives_cleanup_failure() {
        let h = harness();
        stage_and_enqueue(&h, "1-stucktoo", br#"[{"name":"Bob"}]"#).await;
        h.storage.fail_deletes(true);

        let mut last = None;
        loop {
            h.queue.promote_due(IMPORT_TASK_NAME).await.unwrap();
            let Some(delivery) = h.queue.dequeue(IMPORT_TASK_NAME).await.unwrap() else {
                break;
            };
            last = Some(settle(h.queue.as_ref(), &h.processor, delivery).await);
        }

        assert_eq!(last, Some(TaskOutcome::Failed(FailureDisposition::DeadLettered)));
        assert_eq!(h.queue.dead_letters().len(), 1);
        assert_eq!(h.queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_failed() {
        let h = harness();
        h.queue
            .enqueue(IMPORT_TASK_NAME, json!({"unexpected": true}))
            .await
            .unwrap();

        let delivery = h.queue.dequeue(IMPORT_TASK_NAME).await.unwrap().unwrap();
        let outcome = settle(h.queue.as_ref(), &h.processor, delivery).await;

        assert!(matches!(outcome, TaskOutcome::Failed(_)));
        assert_eq!(h.queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_run_processes_queue_until_shutdown() {
        let h = harness();
        stage_and_enqueue(&h, "1-runone", br#"[{"name":"Ann","email":"ann@x.io"}]"#).await;
        stage_and_enqueue(&h, "1-runtwo", br#"[{"name":"Bob","email":"bob@x.io"}]"#).await;
        stage_and_enqueue(&h, "1-runthree", br#"{"data":[{"name":"Cy","email":"cy@x.io"}]}"#).await;

        let worker = Worker::new(h.queue.clone(), h.processor.clone(), config());
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(async move {
            worker
                .run(async {
                    let _ = stopped.await;
                })
                .await
        });

        wait_for_rows(&h.contacts, 3).await;
        stop.send(()).unwrap();
        running.await.unwrap().unwrap();

        assert_eq!(h.queue.ready_len(IMPORT_TASK_NAME), 0);
        assert_eq!(h.queue.in_flight_len(), 0);
        assert!(h.storage.keys().is_empty());
    }

    #[tokio::test]
    async fn test_run_recovers_abandoned_tasks() {
        let h = harness();
        stage_and_enqueue(&h, "1-abandoned", br#"[{"name":"Ann","email":"ann@x.io"}]"#).await;
        let _abandoned = h.queue.dequeue(IMPORT_TASK_NAME).await.unwrap().unwrap();
        assert_eq!(h.queue.in_flight_len(), 1);

        let worker = Worker::new(h.queue.clone(), h.processor.clone(), config());
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(async move {
            worker
                .run(async {
                    let _ = stopped.await;
                })
                .await
        });

        wait_for_rows(&h.contacts, 1).await;
        stop.send(()).unwrap();
        running.await.unwrap().unwrap();

        assert_eq!(h.queue.in_flight_len(), 0);
    }
}
