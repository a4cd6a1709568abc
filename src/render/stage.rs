//! Deadline and cancellation wrappers for render stages

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a bounded stage ended
#[derive(Debug, PartialEq, Eq)]
pub enum StageOutcome<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Run `operation` until it finishes, `limit` elapses, or `cancel` fires.
///
/// The operation is dropped on timeout or cancellation, so its output can
/// never surface afterwards.
pub async fn run_stage<F, T>(operation: F, limit: Duration, cancel: &CancellationToken) -> StageOutcome<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => StageOutcome::Cancelled,
        result = tokio::time::timeout(limit, operation) => match result {
            Ok(value) => StageOutcome::Completed(value),
            Err(_) => StageOutcome::TimedOut,
        },
    }
}

/// Sleep for `duration` unless cancelled first. Returns false if cancelled.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn completes_within_limit() {
        let cancel = CancellationToken::new();
        let outcome = run_stage(async { 7 }, Duration::from_millis(10), &cancel).await;
        assert_eq!(outcome, StageOutcome::Completed(7));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_limit() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let outcome = run_stage(
            tokio::time::sleep(Duration::from_secs(1)),
            Duration::from_millis(200),
            &cancel,
        )
        .await;

        assert_eq!(outcome, StageOutcome::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(210));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_slow_operation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = run_stage(
            tokio::time::sleep(Duration::from_secs(10)),
            Duration::from_secs(5),
            &cancel,
        )
        .await;
        assert_eq!(outcome, StageOutcome::Cancelled);

        assert!(!cancellable_sleep(Duration::from_secs(1), &cancel).await);
    }
}
