//! Deadline and cancellation carried into every scaler call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ScalerError, ScalerResult};

/// Per-call context: a hard deadline plus a cancellation token.
///
/// Scalers doing their own I/O should wrap it in [`PollContext::run`] so
/// the call aborts as soon as either fires.
#[derive(Debug, Clone)]
pub struct PollContext {
    deadline: Instant,
    budget: Duration,
    cancel: CancellationToken,
}

impl PollContext {
    /// A context with its own, independent cancellation token.
    pub fn new(budget: Duration) -> Self {
        Self::with_parent(budget, &CancellationToken::new())
    }

    /// A context cancelled whenever `parent` is.
    pub fn with_parent(budget: Duration, parent: &CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + budget,
            budget,
            cancel: parent.child_token(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before the deadline (zero once it has passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Race `fut` against cancellation and the deadline. The future is
    /// dropped as soon as either fires.
    pub async fn run<T, F>(&self, fut: F) -> ScalerResult<T>
    where
        F: Future<Output = ScalerResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScalerError::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.unwrap_or(Err(ScalerError::Timeout(self.budget)))
            }
        }
    }
}
