//! Per-request deadline and cancellation.
//!
//! Every store and provider call runs through [`RequestContext::guard`], which
//! bounds it by both a per-call limit and the remaining request deadline and
//! abandons it as soon as the request is canceled.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};

/// Deadline used for background work (mirror retries, sweeps).
const BACKGROUND_DEADLINE: Duration = Duration::from_secs(300);

/// Per-call limits applied to collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub store: Duration,
    pub provider: Duration,
    pub notifier: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_secs(5),
            provider: Duration::from_secs(10),
            notifier: Duration::from_secs(5),
        }
    }
}

/// Deadline and cancellation scope of one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl RequestContext {
    /// A context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// A context for work not tied to any inbound request.
    pub fn background() -> Self {
        Self::with_timeout(BACKGROUND_DEADLINE)
    }

    /// Token that cancels this context when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the request deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Runs `fut` bounded by `limit` and by the request deadline.
    ///
    /// Elapsing `limit` is reported as `Unavailable` (the collaborator was too
    /// slow); elapsing the request deadline or cancellation as `Canceled`.
    pub async fn guard<T, F>(&self, what: &str, limit: Duration, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        if self.is_canceled() {
            return Err(AppError::Canceled(format!("Request canceled before {}", what)));
        }

        let remaining = self.remaining();
        let deadline_bound = remaining <= limit;
        let effective = limit.min(remaining);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(AppError::Canceled(format!("Request canceled during {}", what)))
            }
            result = tokio::time::timeout(effective, fut) => match result {
                Ok(inner) => inner,
                Err(_) if deadline_bound => {
                    Err(AppError::Canceled(format!("Request deadline exceeded during {}", what)))
                }
                Err(_) => Err(AppError::Unavailable(format!(
                    "{} timed out after {}ms",
                    what,
                    limit.as_millis()
                ))),
            },
        }
    }
}
