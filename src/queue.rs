/// FIFO hand-off of evaluation tasks from the enrichment pipeline to the
/// evaluation worker.
///
/// Delivery is at-least-once: a task whose handler fails goes back to the
/// tail of the queue after a delay, so order across retries is not kept.
use crate::errors::{AppError, ResultExt};
use crate::models::EvaluationTask;
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on an idle wait before the queue is polled again.
const POLL_EVERY: Duration = Duration::from_secs(5);

/// Postgres channel used to wake idle consumers.
const NOTIFY_CHANNEL: &str = "evaluation_tasks";

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Appends a task to the tail.
    async fn publish(&self, task: &EvaluationTask) -> Result<(), AppError>;

    /// Removes and returns the head, if any. Exclusive across consumers.
    async fn try_pop(&self) -> Result<Option<EvaluationTask>, AppError>;

    /// Returns when a task may have arrived, or after an idle timeout.
    /// Safe to drop at any point.
    async fn wait_for_task(&self);
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &EvaluationTask) -> Result<(), AppError>;
}

/// Pops tasks one at a time and runs `handler` on each until `cancel` fires.
///
/// A failed task is re-published after `requeue_delay`. Cancellation is only
/// observed between tasks: a task being handled always runs to completion,
/// and a failed task is re-published before returning.
pub async fn subscribe(
    queue: &dyn WorkQueue,
    handler: &dyn TaskHandler,
    requeue_delay: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("Evaluation queue consumer started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let task = match queue.try_pop().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = queue.wait_for_task() => continue,
                }
            }
            Err(e) => {
                tracing::warn!("Queue pop failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(POLL_EVERY) => continue,
                }
            }
        };

        tracing::info!(username = %task.username, "Processing evaluation task");

        match handler.handle(&task).await {
            Ok(()) => {
                tracing::info!(username = %task.username, "Evaluation task done");
            }
            Err(e) => {
                tracing::warn!(
                    username = %task.username,
                    "Evaluation task failed, requeueing in {:?}: {}",
                    requeue_delay,
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(requeue_delay) => {}
                }
                if let Err(e) = queue.publish(&task).await {
                    tracing::error!(
                        username = %task.username,
                        "Failed to requeue evaluation task, it is lost: {}",
                        e
                    );
                }
            }
        }
    }

    tracing::info!("Evaluation queue consumer stopped");
}

// ============ In-process queue ============

/// Queue living in process memory. Used when no database is configured
/// and in tests.
#[derive(Default)]
pub struct MemoryQueue {
    tasks: Mutex<VecDeque<EvaluationTask>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn publish(&self, task: &EvaluationTask) -> Result<(), AppError> {
        self.tasks
            .lock()
            .map_err(|_| AppError::InternalError("queue lock poisoned".to_string()))?
            .push_back(task.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn try_pop(&self) -> Result<Option<EvaluationTask>, AppError> {
        let task = self
            .tasks
            .lock()
            .map_err(|_| AppError::InternalError("queue lock poisoned".to_string()))?
            .pop_front();
        Ok(task)
    }

    async fn wait_for_task(&self) {
        let _ = tokio::time::timeout(POLL_EVERY, self.notify.notified()).await;
    }
}

// ============ Postgres queue ============

/// Durable queue in the `evaluation_tasks` table.
///
/// Popping deletes the oldest row under `FOR UPDATE SKIP LOCKED`, so several
/// consumers can share one queue. Idle consumers wait on `LISTEN`, with a
/// periodic poll in case a notification is missed.
pub struct PgWorkQueue {
    pool: PgPool,
    name: String,
    listener: tokio::sync::Mutex<Option<PgListener>>,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            listener: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn connect_listener(&self) -> Result<PgListener, AppError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .context("connecting queue listener")?;
        listener
            .listen(NOTIFY_CHANNEL)
            .await
            .context("listening for queue notifications")?;
        Ok(listener)
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn publish(&self, task: &EvaluationTask) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.context("starting publish")?;

        sqlx::query("INSERT INTO evaluation_tasks (queue, payload) VALUES ($1, $2)")
            .bind(&self.name)
            .bind(Json(task))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("publishing task for {}", task.username))?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(&self.name)
            .execute(&mut *tx)
            .await
            .context("notifying queue consumers")?;

        tx.commit().await.context("committing publish")?;

        tracing::debug!(queue = %self.name, username = %task.username, "Published evaluation task");
        Ok(())
    }

    async fn try_pop(&self) -> Result<Option<EvaluationTask>, AppError> {
        loop {
            let row: Option<(i64, serde_json::Value)> = sqlx::query_as(
                r#"
                DELETE FROM evaluation_tasks
                WHERE id = (
                    SELECT id FROM evaluation_tasks
                    WHERE queue = $1
                    ORDER BY id
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                RETURNING id, payload
                "#,
            )
            .bind(&self.name)
            .fetch_optional(&self.pool)
            .await
            .context("popping evaluation task")?;

            let Some((id, payload)) = row else {
                return Ok(None);
            };

            match serde_json::from_value::<EvaluationTask>(payload) {
                Ok(task) => return Ok(Some(task)),
                Err(e) => {
                    // Undecodable payloads would fail forever, drop them.
                    tracing::error!(queue = %self.name, id, "Dropping malformed evaluation task: {}", e);
                }
            }
        }
    }

    async fn wait_for_task(&self) {
        let mut guard = self.listener.lock().await;

        if guard.is_none() {
            match self.connect_listener().await {
                Ok(listener) => *guard = Some(listener),
                Err(e) => {
                    tracing::warn!("Queue listener unavailable, polling: {}", e);
                    drop(guard);
                    tokio::time::sleep(POLL_EVERY).await;
                    return;
                }
            }
        }

        let Some(listener) = guard.as_mut() else {
            return;
        };

        match tokio::time::timeout(POLL_EVERY, listener.recv()).await {
            Ok(Ok(_)) | Err(_) => {}
            Ok(Err(e)) => {
                tracing::warn!("Queue listener failed, reconnecting: {}", e);
                *guard = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(username: &str) -> EvaluationTask {
        EvaluationTask {
            username: username.to_string(),
            profile_url: format!("https://github.com/{}", username),
            blog_url: String::new(),
            description: String::new(),
            repositories: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_queue_is_fifo() {
        let queue = MemoryQueue::new();
        queue.publish(&task("a")).await.unwrap();
        queue.publish(&task("b")).await.unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop().await.unwrap().unwrap().username, "a");
        assert_eq!(queue.try_pop().await.unwrap().unwrap().username, "b");
        assert!(queue.try_pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_returns_after_publish() {
        let queue = MemoryQueue::new();
        queue.publish(&task("a")).await.unwrap();

        // The stored permit makes this return immediately.
        tokio::time::timeout(Duration::from_secs(1), queue.wait_for_task())
            .await
            .unwrap();
    }
}
