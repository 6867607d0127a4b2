//! Work queue worker pool: drains `WorkQueue` run ids and drives each
//! through `PipelineExecutor::process`, applying bounded retry-with-jitter
//! on non-LLM failures.
//! An LLM failure never reaches this retry loop — `process` already
//! contains it into a terminal `partial` run and returns `Ok`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;

use crate::pipeline::PipelineExecutor;
use crate::queue::WorkQueueReceiver;

const BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Spawn `worker_concurrency` tasks that share `receiver` and loop forever,
/// draining run ids as they arrive. Returns their `JoinHandle`s so the
/// caller can await a clean shutdown if it wants to.
pub fn spawn_workers(
    executor: Arc<PipelineExecutor>,
    receiver: WorkQueueReceiver,
    worker_concurrency: usize,
    max_attempts: u32,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_concurrency.max(1))
        .map(|worker_index| {
            let executor = Arc::clone(&executor);
            let receiver = receiver.clone();
            tokio::spawn(async move {
                tracing::info!(worker_index, "pipeline worker started");
                while let Some(run_id) = receiver.recv().await {
                    run_with_retry(&executor, &run_id, max_attempts).await;
                }
                tracing::info!(worker_index, "pipeline worker shut down: queue closed");
            })
        })
        .collect()
}

async fn run_with_retry(executor: &PipelineExecutor, run_id: &str, max_attempts: u32) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match executor.process(run_id).await {
            Ok(()) => {
                tracing::info!(run_id, attempt, "review run completed");
                return;
            }
            Err(error) => {
                if attempt >= max_attempts {
                    tracing::error!(run_id, attempt, %error, "review run failed, exhausted retries");
                    return;
                }
                let delay = backoff_with_jitter(attempt);
                tracing::warn!(run_id, attempt, %error, delay_ms = delay.as_millis() as u64, "review run failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff (`BASE_BACKOFF * 2^(attempt-1)`) with up to 50%
/// jitter, so a burst of simultaneously-failing runs doesn't retry in lockstep.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let base = BASE_BACKOFF * 2u32.saturating_pow(exponent);
    let jitter_factor: f64 = rand::rng().random_range(0.0..0.5);
    base + Duration::from_secs_f64(base.as_secs_f64() * jitter_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_bounded() {
        let first = backoff_with_jitter(1);
        let third = backoff_with_jitter(3);
        assert!(first >= BASE_BACKOFF);
        assert!(third > first);
    }
}
