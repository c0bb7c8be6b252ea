use crate::ai_client::{evaluation_messages, parse_response, AiService, DeveloperFacts};
use crate::db_storage::ProfileStore;
use crate::errors::AppError;
use crate::models::{EvaluationTask, TechEvaluation};
use crate::queue::{subscribe, TaskHandler, WorkQueue, DEFAULT_REQUEUE_DELAY};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Attaches an AI technical evaluation to stored profiles.
///
/// Each task produces one partial update touching only `tech_evaluation` and
/// `updated_at`, so scores written by a concurrent enrichment survive.
pub struct EvaluationWorker {
    store: Arc<dyn ProfileStore>,
    ai: Arc<dyn AiService>,
    queue: Arc<dyn WorkQueue>,
    requeue_delay: Duration,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl EvaluationWorker {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        ai: Arc<dyn AiService>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            store,
            ai,
            queue,
            requeue_delay: DEFAULT_REQUEUE_DELAY,
            running: None,
        }
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Starts consuming the queue on a background task. Does nothing if
    /// already started.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handler = TaskProcessor {
            store: self.store.clone(),
            ai: self.ai.clone(),
        };
        let queue = self.queue.clone();
        let delay = self.requeue_delay;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            subscribe(queue.as_ref(), &handler, delay, token).await;
        });

        tracing::info!("Evaluation worker started");
        self.running = Some((cancel, handle));
    }

    /// Signals the consumer to stop and waits for the task in flight, if
    /// any, to finish.
    pub async fn stop(&mut self) {
        let Some((cancel, handle)) = self.running.take() else {
            return;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::error!("Evaluation worker terminated abnormally: {}", e);
        }
        tracing::info!("Evaluation worker stopped");
    }

    /// Processes a single task without going through the queue.
    pub async fn process(&self, task: &EvaluationTask) -> Result<(), AppError> {
        TaskProcessor {
            store: self.store.clone(),
            ai: self.ai.clone(),
        }
        .handle(task)
        .await
    }
}

struct TaskProcessor {
    store: Arc<dyn ProfileStore>,
    ai: Arc<dyn AiService>,
}

#[async_trait]
impl TaskHandler for TaskProcessor {
    async fn handle(&self, task: &EvaluationTask) -> Result<(), AppError> {
        let profile = self
            .store
            .find_by_username(&task.username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("profile {}", task.username)))?;

        let facts = DeveloperFacts {
            username: profile.username.clone(),
            name: profile.name.clone(),
            bio: task.description.clone(),
            location: profile.location.clone(),
            email: profile.email.clone(),
            company: String::new(),
            profile_url: task.profile_url.clone(),
            blog_url: task.blog_url.clone(),
            skills: profile.skills.clone(),
            repositories: task.repositories.clone(),
            star_count: profile.star_count,
            fork_count: profile.fork_count,
            commit_count: profile.commit_count,
            followers: 0,
            last_active: profile.last_active.map(|t| t.to_rfc3339()),
        };

        let text = self.ai.complete(evaluation_messages(&facts)).await?;
        let parsed = parse_response(&text);

        let now = Utc::now();
        let evaluation = TechEvaluation {
            blog_url: task.blog_url.clone(),
            personal_site_url: task.profile_url.clone(),
            biography: task.description.clone(),
            specialties: parsed.specialties,
            experience: parsed.experience,
            ai_evaluation: parsed.evaluation,
            last_evaluated: Some(now),
        };

        self.store
            .update_tech_evaluation(&task.username, &evaluation, now)
            .await?;

        tracing::info!(
            username = %task.username,
            specialties = evaluation.specialties.len(),
            "Stored technical evaluation"
        );
        Ok(())
    }
}
