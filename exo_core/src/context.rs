//! Per-request cancellation and deadline.

use errors::DirectoryError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-supplied cancellation scope for remote calls.
///
/// Cloning shares the same token, so cancelling any clone aborts every
/// in-flight call bound to it.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drives `fut` unless the context is cancelled or its deadline passes
    /// first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, DirectoryError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(DirectoryError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(DirectoryError::Timeout);
        }

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DirectoryError::Cancelled),
            () = expired => Err(DirectoryError::Timeout),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = RequestContext::new();
        let out = ctx.run(async { Ok::<_, DirectoryError>(7) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let ctx = RequestContext::new();
        ctx.cancel();
        let out = ctx.run(async { Ok::<_, DirectoryError>(1) }).await;
        assert!(matches!(out, Err(DirectoryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_from_clone_aborts_pending_call() {
        let ctx = RequestContext::new();
        let other = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            other.cancel();
        });
        let out = ctx
            .run(std::future::pending::<Result<(), DirectoryError>>())
            .await;
        assert!(matches!(out, Err(DirectoryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(10));
        let out = ctx
            .run(std::future::pending::<Result<(), DirectoryError>>())
            .await;
        assert!(matches!(out, Err(DirectoryError::Timeout)));
    }
}
