//! Intake & Admission (component F): idempotency lookup, concurrency cap,
//! rate limit, and enqueue onto the work queue.
//!
//! Kept deliberately thin and synchronous from the caller's point of view —
//! admission decisions happen against the store before anything is handed
//! to the queue, so a rejected request never touches the pipeline executor.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{Error, IntakeError, Result};
use crate::model::ReviewRun;
use crate::queue::WorkQueue;
use crate::store::ReviewStore;

/// 24h idempotency-key reuse window.
const IDEMPOTENCY_WINDOW: Duration = Duration::hours(24);

pub struct ReviewIntake {
    store: ReviewStore,
    queue: WorkQueue,
    max_concurrent_runs: i64,
    rate_limit_per_minute: i64,
}

#[derive(Debug)]
pub struct EnqueueOutcome {
    pub run: ReviewRun,
    pub idempotency_reused: bool,
}

impl ReviewIntake {
    pub fn new(store: ReviewStore, queue: WorkQueue, max_concurrent_runs: i64, rate_limit_per_minute: i64) -> Self {
        Self { store, queue, max_concurrent_runs, rate_limit_per_minute }
    }

    /// Run the five admission steps in order: resolve document, idempotency
    /// lookup, concurrency cap, rate limit, then create-and-enqueue.
    pub async fn enqueue_run(
        &self,
        document_id: &str,
        idempotency_key: Option<&str>,
        request_fingerprint: &str,
    ) -> Result<EnqueueOutcome> {
        // Step 1: resolve document (fail fast if it doesn't exist).
        self.store.get_document(document_id).await?;

        // Step 2: idempotency lookup.
        if let Some(key) = idempotency_key {
            if let Some(existing) = self.store.find_run_by_idempotency_key(document_id, key).await? {
                let created_at = existing
                    .created_at
                    .parse::<chrono::DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now());
                if Utc::now() - created_at <= IDEMPOTENCY_WINDOW {
                    return Ok(EnqueueOutcome { run: existing, idempotency_reused: true });
                }
                return Err(Error::Intake(IntakeError::IdempotencyExpired {
                    existing_run_id: existing.id,
                }));
            }
        }

        // Step 3: concurrency cap.
        let active = self.store.count_active_runs().await?;
        if active >= self.max_concurrent_runs {
            return Err(Error::Intake(IntakeError::TooManyConcurrent { limit: self.max_concurrent_runs }));
        }

        // Step 4: rate limit.
        let recent = self.store.count_recent_runs_for_fingerprint(request_fingerprint).await?;
        if recent >= self.rate_limit_per_minute {
            return Err(Error::Intake(IntakeError::RateLimited { limit_per_minute: self.rate_limit_per_minute }));
        }

        // Step 5: create + enqueue.
        let run_id = Uuid::new_v4().to_string();
        let run = self.store.create_run(&run_id, document_id, idempotency_key, request_fingerprint).await?;

        if let Err(send_error) = self.queue.enqueue(run.id.clone()) {
            let reason = send_error.to_string();
            self.store.mark_run_enqueue_failed(&run.id, &reason).await?;
            let failed_run = self.store.get_run(&run.id).await?;
            return Err(Error::Intake(IntakeError::EnqueueFailed {
                run_id: failed_run.id.clone(),
                reason,
                run: serde_json::to_value(&failed_run).unwrap_or(serde_json::Value::Null),
            }));
        }

        Ok(EnqueueOutcome { run, idempotency_reused: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, SourceType};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (ReviewStore, WorkQueue, crate::queue::WorkQueueReceiver) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = ReviewStore::new(pool);
        store.initialize().await.expect("schema should init");
        store
            .create_document(&Document {
                id: "doc-1".to_string(),
                title: "t".to_string(),
                text: "1. Termination\nEither party may terminate with 15 days notice.".to_string(),
                source_type: SourceType::Text,
                ingestion_metadata: serde_json::Value::Null,
                created_at: String::new(),
            })
            .await
            .unwrap();
        let (queue, receiver) = WorkQueue::new(16);
        (store, queue, receiver)
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let (store, queue, _receiver) = setup().await;
        let intake = ReviewIntake::new(store, queue, 10, 20);
        let result = intake.enqueue_run("missing", None, "fp-1").await;
        assert!(matches!(result, Err(Error::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_reuses_run() {
        let (store, queue, _receiver) = setup().await;
        let intake = ReviewIntake::new(store, queue, 10, 20);

        let first = intake.enqueue_run("doc-1", Some("dup-key-1"), "fp-1").await.unwrap();
        assert!(!first.idempotency_reused);

        let second = intake.enqueue_run("doc-1", Some("dup-key-1"), "fp-1").await.unwrap();
        assert!(second.idempotency_reused);
        assert_eq!(second.run.id, first.run.id);
    }

    #[tokio::test]
    async fn concurrency_cap_rejects_at_limit() {
        let (store, queue, _receiver) = setup().await;
        let intake = ReviewIntake::new(store, queue, 1, 20);

        intake.enqueue_run("doc-1", None, "fp-1").await.unwrap();
        let result = intake.enqueue_run("doc-1", None, "fp-2").await;
        assert!(matches!(result, Err(Error::Intake(IntakeError::TooManyConcurrent { limit: 1 }))));
    }

    #[tokio::test]
    async fn idempotency_key_older_than_24h_is_expired() {
        let (store, queue, _receiver) = setup().await;

        let first = store.create_run("run-1", "doc-1", Some("expired-key-1"), "fp-1").await.unwrap();
        sqlx::query("UPDATE review_runs SET created_at = datetime('now', '-25 hours') WHERE id = ?")
            .bind(&first.id)
            .execute(store.pool())
            .await
            .unwrap();

        let intake = ReviewIntake::new(store, queue, 10, 20);
        let result = intake.enqueue_run("doc-1", Some("expired-key-1"), "fp-1").await;
        match result {
            Err(Error::Intake(IntakeError::IdempotencyExpired { existing_run_id })) => {
                assert_eq!(existing_run_id, "run-1");
            }
            other => panic!("expected IdempotencyExpired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_rejects_same_fingerprint() {
        let (store, queue, _receiver) = setup().await;
        let intake = ReviewIntake::new(store, queue, 10, 1);

        intake.enqueue_run("doc-1", None, "fp-shared").await.unwrap();
        let result = intake.enqueue_run("doc-1", None, "fp-shared").await;
        assert!(matches!(
            result,
            Err(Error::Intake(IntakeError::RateLimited { limit_per_minute: 1 }))
        ));
    }
}
