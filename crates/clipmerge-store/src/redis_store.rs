//! Redis-backed task repository and credit ledger.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, warn};

use clipmerge_models::{OutputEntry, Task, TaskError, TaskId, TransitionError};

use crate::credits::{CreditLedger, DebitOutcome};
use crate::error::{StoreError, StoreResult};
use crate::tasks::TaskRepository;

/// Replace a value only if it still holds what the caller read.
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Debit only when the balance covers the request.
const COMPARE_AND_DEBIT: &str = r#"
local balance = tonumber(redis.call('GET', KEYS[1]) or '0')
local units = tonumber(ARGV[1])
if balance < units then
    return {0, balance}
end
local after = redis.call('DECRBY', KEYS[1], units)
return {1, after}
"#;

/// Attempts at a compare-and-set before giving up.
const MAX_CAS_ATTEMPTS: u32 = 3;

/// Task records stored as JSON strings.
pub struct RedisTaskRepository {
    client: redis::Client,
    prefix: String,
    cas: redis::Script,
}

impl RedisTaskRepository {
    pub fn new(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            cas: redis::Script::new(COMPARE_AND_SET),
        }
    }

    fn key(&self, task_id: &TaskId) -> String {
        format!("{}:task:{}", self.prefix, task_id)
    }

    async fn transition<F>(&self, task_id: &TaskId, apply: F) -> StoreResult<Task>
    where
        F: Fn(&mut Task) -> Result<(), TransitionError> + Send + Sync,
    {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(task_id);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current: Option<String> = conn.get(&key).await?;
            let current = current.ok_or_else(|| StoreError::not_found(format!("task {task_id}")))?;

            let mut task: Task = serde_json::from_str(&current)?;
            apply(&mut task)?;
            let next = serde_json::to_string(&task)?;

            let swapped: i32 = self
                .cas
                .key(&key)
                .arg(&current)
                .arg(&next)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                return Ok(task);
            }
            debug!(task_id = %task_id, attempt, "Task record changed underneath, retrying");
        }

        warn!(task_id = %task_id, "Gave up updating task after {} attempts", MAX_CAS_ATTEMPTS);
        Err(StoreError::Contention(format!("task {task_id}")))
    }
}

#[async_trait]
impl TaskRepository for RedisTaskRepository {
    async fn create(&self, task: &Task) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(task)?;

        let created: bool = conn.set_nx(self.key(&task.task_id), payload).await?;
        if !created {
            return Err(StoreError::conflict(format!("task {}", task.task_id)));
        }
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> StoreResult<Option<Task>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(self.key(task_id)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }

    async fn complete(&self, task_id: &TaskId, outputs: Vec<OutputEntry>) -> StoreResult<Task> {
        self.transition(task_id, |task| task.complete(outputs.clone())).await
    }

    async fn fail(&self, task_id: &TaskId, error: TaskError) -> StoreResult<Task> {
        self.transition(task_id, |task| task.fail(error.clone())).await
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Credit balances stored as integer keys.
pub struct RedisCreditLedger {
    client: redis::Client,
    prefix: String,
    debit: redis::Script,
}

impl RedisCreditLedger {
    pub fn new(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            debit: redis::Script::new(COMPARE_AND_DEBIT),
        }
    }

    fn key(&self, account_id: &str) -> String {
        format!("{}:credits:{}", self.prefix, account_id)
    }
}

#[async_trait]
impl CreditLedger for RedisCreditLedger {
    async fn balance(&self, account_id: &str) -> StoreResult<i64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let balance: Option<i64> = conn.get(self.key(account_id)).await?;
        Ok(balance.unwrap_or(0))
    }

    async fn try_debit(&self, account_id: &str, units: u64) -> StoreResult<DebitOutcome> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let (debited, balance): (i64, i64) = self
            .debit
            .key(self.key(account_id))
            .arg(units)
            .invoke_async(&mut conn)
            .await?;

        Ok(if debited == 1 {
            DebitOutcome::Debited { balance_after: balance }
        } else {
            DebitOutcome::Insufficient { balance }
        })
    }

    async fn credit(&self, account_id: &str, units: u64) -> StoreResult<i64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let balance: i64 = conn.incr(self.key(account_id), units).await?;
        Ok(balance)
    }
}
