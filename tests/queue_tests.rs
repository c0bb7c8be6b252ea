/// Queue redelivery and evaluation worker lifecycle.
mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{stored_profile, FakeAi, MemoryStore};
use devrank::db_storage::ProfileStore;
use devrank::errors::AppError;
use devrank::models::EvaluationTask;
use devrank::queue::{subscribe, MemoryQueue, TaskHandler, WorkQueue};
use devrank::worker::EvaluationWorker;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const REQUEUE: Duration = Duration::from_millis(10);

fn task(username: &str) -> EvaluationTask {
    EvaluationTask {
        username: username.to_string(),
        profile_url: format!("https://github.com/{}", username),
        blog_url: "https://blog.example.com".to_string(),
        description: "Builds compilers".to_string(),
        repositories: vec!["compiler".to_string()],
        created_at: Utc::now(),
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Fails the first `failures` calls, then succeeds.
struct FlakyHandler {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, _task: &EvaluationTask) -> Result<(), AppError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(AppError::ExternalApiError("AI API returned 503".to_string()))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_task_failing_once_is_processed_exactly_twice() {
    let queue = Arc::new(MemoryQueue::new());
    let handler = Arc::new(FlakyHandler {
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    queue.publish(&task("octocat")).await.unwrap();

    let cancel = CancellationToken::new();
    let consumer = {
        let (queue, handler, cancel) = (queue.clone(), handler.clone(), cancel.clone());
        tokio::spawn(async move {
            subscribe(queue.as_ref(), handler.as_ref(), REQUEUE, cancel).await;
        })
    };

    wait_until(|| handler.calls.load(Ordering::SeqCst) >= 2).await;
    // Leave room for a stray third delivery to show up
    tokio::time::sleep(REQUEUE * 5).await;

    cancel.cancel();
    consumer.await.unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_failed_task_goes_to_the_tail() {
    let queue = Arc::new(MemoryQueue::new());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    struct Recorder {
        order: Arc<std::sync::Mutex<Vec<String>>>,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, task: &EvaluationTask) -> Result<(), AppError> {
            self.order.lock().unwrap().push(task.username.clone());
            if task.username == "first" && !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(AppError::NotFound("profile first".to_string()));
            }
            Ok(())
        }
    }

    queue.publish(&task("first")).await.unwrap();
    queue.publish(&task("second")).await.unwrap();

    let handler = Arc::new(Recorder {
        order: order.clone(),
        failed_once: AtomicBool::new(false),
    });
    let cancel = CancellationToken::new();
    let consumer = {
        let (queue, handler, cancel) = (queue.clone(), handler.clone(), cancel.clone());
        tokio::spawn(async move {
            subscribe(queue.as_ref(), handler.as_ref(), REQUEUE, cancel).await;
        })
    };

    wait_until(|| order.lock().unwrap().len() >= 3).await;
    cancel.cancel();
    consumer.await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "first"]);
}

#[tokio::test]
async fn test_stop_waits_for_task_in_flight() {
    struct SlowHandler {
        started: AtomicBool,
        finished: AtomicBool,
    }

    #[async_trait]
    impl TaskHandler for SlowHandler {
        async fn handle(&self, _task: &EvaluationTask) -> Result<(), AppError> {
            self.started.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let queue = Arc::new(MemoryQueue::new());
    queue.publish(&task("octocat")).await.unwrap();
    let handler = Arc::new(SlowHandler {
        started: AtomicBool::new(false),
        finished: AtomicBool::new(false),
    });

    let cancel = CancellationToken::new();
    let consumer = {
        let (queue, handler, cancel) = (queue.clone(), handler.clone(), cancel.clone());
        tokio::spawn(async move {
            subscribe(queue.as_ref(), handler.as_ref(), REQUEUE, cancel).await;
        })
    };

    wait_until(|| handler.started.load(Ordering::SeqCst)).await;
    cancel.cancel();
    consumer.await.unwrap();

    assert!(handler.finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_worker_attaches_evaluation() {
    let store = Arc::new(MemoryStore::new());
    store.insert(stored_profile("octocat", "", 37.5));
    let ai = Arc::new(FakeAi::replying(
        "```json\n{\"specialties\": [\"compilers\", \"systems\"], \
         \"experience\": {\"Rust\": \"expert\"}, \
         \"evaluation\": \"Deep systems background\"}\n```",
    ));
    let queue = Arc::new(MemoryQueue::new());

    let mut worker = EvaluationWorker::new(store.clone(), ai.clone(), queue.clone())
        .with_requeue_delay(REQUEUE);
    worker.start();
    assert!(worker.is_running());

    queue.publish(&task("octocat")).await.unwrap();

    let store_ref = store.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            let stored = store_ref.find_by_username("octocat").await.unwrap().unwrap();
            if stored.tech_evaluation.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("evaluation not stored in time");

    worker.stop().await;
    assert!(!worker.is_running());

    let stored = store.find_by_username("octocat").await.unwrap().unwrap();
    let evaluation = stored.tech_evaluation.unwrap();
    assert_eq!(evaluation.specialties, vec!["compilers", "systems"]);
    assert_eq!(evaluation.experience.get("Rust").map(String::as_str), Some("expert"));
    assert_eq!(evaluation.ai_evaluation, "Deep systems background");
    assert_eq!(evaluation.blog_url, "https://blog.example.com");
    assert_eq!(evaluation.personal_site_url, "https://github.com/octocat");
    assert_eq!(evaluation.biography, "Builds compilers");
    assert!(evaluation.last_evaluated.is_some());
    // Scores are untouched by the partial update
    assert_eq!(stored.talent_rank, 37.5);
    assert_eq!(ai.calls(), 1);
}

#[tokio::test]
async fn test_worker_fails_for_missing_profile() {
    let worker = EvaluationWorker::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FakeAi::replying("{}")),
        Arc::new(MemoryQueue::new()),
    );

    let err = worker.process(&task("ghost")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_worker_keeps_free_text_answer() {
    let store = Arc::new(MemoryStore::new());
    store.insert(stored_profile("octocat", "", 37.5));
    let worker = EvaluationWorker::new(
        store.clone(),
        Arc::new(FakeAi::replying("A capable generalist.")),
        Arc::new(MemoryQueue::new()),
    );

    worker.process(&task("octocat")).await.unwrap();

    let evaluation = store
        .find_by_username("octocat")
        .await
        .unwrap()
        .unwrap()
        .tech_evaluation
        .unwrap();
    assert!(evaluation.specialties.is_empty());
    assert!(evaluation.experience.is_empty());
    assert_eq!(evaluation.ai_evaluation, "A capable generalist.");
}
