// ==============================================================================
// queue.rs - Redis Task Queue
// ==============================================================================
// Description: Named task queue with reliable delivery (in-flight list),
//              delayed retries with exponential backoff, and dead-lettering
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
//
// Keys per task name:
//   contact_import:<task>:ready                 LPUSH on enqueue, popped from the right
//   contact_import:<task>:in_flight:<consumer>  LMOVE target while a task runs
//   contact_import:<task>:delayed               ZSET scored by due time (ms)
//   contact_import:<task>:dead                  envelopes that used every attempt
//
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction, Script};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "contact_import";
const PROMOTE_BATCH: isize = 100;

/// Move due entries from the delayed set to the ready list in one step
///
/// KEYS[1] delayed set, KEYS[2] ready list, ARGV[1] now (ms), ARGV[2] batch size
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, raw in ipairs(due) do
    redis.call('ZREM', KEYS[1], raw)
    redis.call('LPUSH', KEYS[2], raw)
end
return #due
"#;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: Uuid,
}

/// A queued task as stored in the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub task: String,
    pub payload: Value,
    /// 1-based number of the delivery this envelope represents
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// A dequeued task plus the receipt needed to settle it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    receipt: String,
}

impl Delivery {
    pub fn new(envelope: TaskEnvelope, receipt: String) -> Self {
        Self { envelope, receipt }
    }

    pub fn receipt(&self) -> &str {
        &self.receipt
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    Retrying { attempt: u32, run_at: DateTime<Utc> },
    DeadLettered,
}

/// Exponential task backoff: `base * 2^(attempt - 1)`, capped
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exponent);
        Duration::from_millis(millis).min(self.max_delay)
    }

    /// Decide what happens to a failed delivery
    pub fn disposition(&self, attempt: u32, now: DateTime<Utc>) -> FailureDisposition {
        if attempt >= self.max_attempts {
            return FailureDisposition::DeadLettered;
        }
        let delay = ChronoDuration::from_std(self.delay_after(attempt)).unwrap_or(ChronoDuration::zero());
        FailureDisposition::Retrying {
            attempt: attempt + 1,
            run_at: now + delay,
        }
    }
}

/// Poll-based named task queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &str, payload: Value) -> Result<TaskHandle, QueueError>;

    /// Claim the oldest ready task, if any
    async fn dequeue(&self, task: &str) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Schedule a retry or dead-letter the task
    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<FailureDisposition, QueueError>;

    /// Move delayed retries whose time has come back to the ready list
    async fn promote_due(&self, task: &str) -> Result<usize, QueueError>;

    /// Return tasks left in flight by a previous run of this consumer
    async fn recover_in_flight(&self, task: &str) -> Result<usize, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

pub struct RedisQueue {
    conn: ConnectionManager,
    consumer: String,
    policy: RetryPolicy,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, consumer: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            conn,
            consumer: consumer.into(),
            policy,
        }
    }

    fn ready_key(task: &str) -> String {
        format!("{}:{}:ready", KEY_PREFIX, task)
    }

    fn in_flight_key(&self, task: &str) -> String {
        format!("{}:{}:in_flight:{}", KEY_PREFIX, task, self.consumer)
    }

    fn delayed_key(task: &str) -> String {
        format!("{}:{}:delayed", KEY_PREFIX, task)
    }

    fn dead_key(task: &str) -> String {
        format!("{}:{}:dead", KEY_PREFIX, task)
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn enqueue(&self, task: &str, payload: Value) -> Result<TaskHandle, QueueError> {
        let envelope = TaskEnvelope {
            id: Uuid::new_v4(),
            task: task.to_string(),
            payload,
            attempt: 1,
            max_attempts: self.policy.max_attempts,
            enqueued_at: Utc::now(),
            last_error: None,
        };
        let json = serde_json::to_string(&envelope)?;

        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(Self::ready_key(task), json).await?;

        debug!(task = %task, task_id = %envelope.id, "Task enqueued");
        Ok(TaskHandle { id: envelope.id })
    }

    async fn dequeue(&self, task: &str) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let in_flight = self.in_flight_key(task);

        let raw: Option<String> = conn
            .lmove(Self::ready_key(task), &in_flight, Direction::Right, Direction::Left)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<TaskEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(Delivery::new(envelope, raw))),
            Err(e) => {
                warn!(task = %task, "Dead-lettering undecodable task: {}", e);
                redis::pipe()
                    .atomic()
                    .lrem(&in_flight, 1, &raw)
                    .ignore()
                    .lpush(Self::dead_key(task), &raw)
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.lrem::<_, _, ()>(self.in_flight_key(&delivery.envelope.task), 1, delivery.receipt())
            .await?;
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<FailureDisposition, QueueError> {
        let envelope = &delivery.envelope;
        let task = envelope.task.as_str();
        let policy = RetryPolicy {
            max_attempts: envelope.max_attempts,
            ..self.policy.clone()
        };
        let disposition = policy.disposition(envelope.attempt, Utc::now());

        let mut next = envelope.clone();
        next.last_error = Some(reason.to_string());

        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.in_flight_key(task), 1, delivery.receipt())
            .ignore();

        match &disposition {
            FailureDisposition::Retrying { attempt, run_at } => {
                next.attempt = *attempt;
                pipe.zadd(
                    Self::delayed_key(task),
                    serde_json::to_string(&next)?,
                    run_at.timestamp_millis(),
                )
                .ignore();
            }
            FailureDisposition::DeadLettered => {
                pipe.lpush(Self::dead_key(task), serde_json::to_string(&next)?)
                    .ignore();
            }
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(disposition)
    }

    async fn promote_due(&self, task: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();

        // Scripts run atomically, so concurrent consumers never double-promote
        let script = Script::new(PROMOTE_SCRIPT);
        let promoted: usize = script
            .key(Self::delayed_key(task))
            .key(Self::ready_key(task))
            .arg(now)
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        if promoted > 0 {
            debug!(task = %task, promoted, "Promoted delayed tasks");
        }
        Ok(promoted)
    }

    async fn recover_in_flight(&self, task: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let in_flight = self.in_flight_key(task);
        let ready = Self::ready_key(task);

        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .lmove(&in_flight, &ready, Direction::Right, Direction::Right)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(task = %task, recovered, "Requeued tasks left in flight");
        }
        Ok(recovered)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
        };

        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(5), Duration::from_secs(20));
        assert_eq!(policy.delay_after(40), Duration::from_secs(20));
    }

    #[test]
    fn test_disposition_dead_letters_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        let now = Utc::now();

        assert_eq!(
            policy.disposition(1, now),
            FailureDisposition::Retrying {
                attempt: 2,
                run_at: now + ChronoDuration::seconds(2),
            }
        );
        assert_eq!(policy.disposition(3, now), FailureDisposition::DeadLettered);
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(RedisQueue::ready_key("import-contacts"), "contact_import:import-contacts:ready");
        assert_eq!(RedisQueue::delayed_key("import-contacts"), "contact_import:import-contacts:delayed");
        assert_eq!(RedisQueue::dead_key("import-contacts"), "contact_import:import-contacts:dead");
    }
}
