//! Cancellable requests with a deadline
//!
//! Long-running calls (transcription, note generation, the change poll) race
//! the request against the caller's abort token and a timer. The two ways of
//! stopping early map to different errors: an abort is `RequestAborted`, an
//! expired deadline is `ServerTimedOut`.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::ApplicationError;

/// Run `request` until it finishes, `abort` fires or `timeout` elapses.
pub async fn with_deadline<T, F>(
    request: F,
    abort: &CancellationToken,
    timeout: Duration,
) -> Result<T, ApplicationError>
where
    F: Future<Output = Result<T, ApplicationError>>,
{
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(ApplicationError::RequestAborted(
            "Request was cancelled".to_string(),
        )),
        _ = tokio::time::sleep(timeout) => Err(ApplicationError::ServerTimedOut(format!(
            "No response within {}s",
            timeout.as_secs()
        ))),
        result = request => result,
    }
}

/// Run `request` until it finishes or `abort` fires.
pub async fn cancellable<T, F>(request: F, abort: &CancellationToken) -> Result<T, ApplicationError>
where
    F: Future<Output = Result<T, ApplicationError>>,
{
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(ApplicationError::RequestAborted(
            "Request was cancelled".to_string(),
        )),
        result = request => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_server_timed_out() {
        let abort = CancellationToken::new();
        let result: Result<(), _> = with_deadline(
            std::future::pending(),
            &abort,
            Duration::from_secs(30),
        )
        .await;

        assert_eq!(result.unwrap_err().name(), "Server Timed Out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_is_request_aborted() {
        let abort = CancellationToken::new();
        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = with_deadline(
            std::future::pending(),
            &abort,
            Duration::from_secs(30),
        )
        .await;

        assert!(result.unwrap_err().is_abort());
    }

    #[tokio::test]
    async fn test_completed_request_passes_through() {
        let abort = CancellationToken::new();
        let result = with_deadline(async { Ok(7) }, &abort, Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), 7);

        let result = cancellable(
            async { Err::<(), _>(ApplicationError::BadRequest("no".into())) },
            &abort,
        )
        .await;
        assert_eq!(result.unwrap_err().name(), "Bad Request");
    }
}
