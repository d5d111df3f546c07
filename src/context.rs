use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// Stand-in for timeouts too long to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating at a point decades ahead instead of
/// overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Why the caller's context stopped a call.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Interrupted {
    #[error("call canceled by caller")]
    Canceled,
    #[error("call deadline exceeded")]
    DeadlineExceeded,
}

/// Caller-owned cancellation scope for one or more calls.
///
/// Per-attempt timeouts are layered beneath this context; they never extend
/// past its deadline and never replace its cancellation.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(deadline_after(timeout))
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline_value(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Current interruption, if the context is already canceled or expired.
    pub fn interruption(&self) -> Option<Interrupted> {
        if self.token.is_cancelled() {
            return Some(Interrupted::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupted::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is canceled or its deadline elapses.
    pub(crate) async fn interrupted(&self) -> Interrupted {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Interrupted::Canceled,
                    _ = sleep_until(deadline) => Interrupted::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Interrupted::Canceled
            }
        }
    }

    /// Narrows a per-attempt timeout to what is left of the deadline.
    /// Returns `None` when nothing is left.
    pub(crate) fn attempt_timeout(&self, per_attempt_timeout: Duration) -> Option<Duration> {
        let Some(deadline) = self.deadline else {
            return Some(per_attempt_timeout);
        };
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        Some(per_attempt_timeout.min(deadline - now))
    }

    /// Waits `delay` unless the context is interrupted first.
    pub(crate) async fn sleep(&self, delay: Duration) -> Result<(), Interrupted> {
        if let Some(interrupted) = self.interruption() {
            return Err(interrupted);
        }
        tokio::select! {
            biased;
            interrupted = self.interrupted() => Err(interrupted),
            _ = sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{CallContext, Interrupted};

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_interruption() {
        let context = CallContext::new();
        assert_eq!(context.sleep(Duration::from_secs(3)).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_abandoned_on_cancel() {
        let context = CallContext::new();
        let canceler = context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceler.cancel();
        });
        assert_eq!(
            context.sleep(Duration::from_secs(60)).await,
            Err(Interrupted::Canceled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_stops_at_deadline() {
        let context = CallContext::with_timeout(Duration::from_millis(100));
        assert_eq!(
            context.sleep(Duration::from_secs(60)).await,
            Err(Interrupted::DeadlineExceeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_is_bounded_by_deadline() {
        let context = CallContext::with_timeout(Duration::from_millis(300));
        assert_eq!(
            context.attempt_timeout(Duration::from_secs(10)),
            Some(Duration::from_millis(300))
        );
        assert_eq!(
            context.attempt_timeout(Duration::from_millis(50)),
            Some(Duration::from_millis(50))
        );
        tokio::time::advance(Duration::from_millis(301)).await;
        assert_eq!(context.attempt_timeout(Duration::from_secs(10)), None);
        assert_eq!(context.interruption(), Some(Interrupted::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_saturates_instead_of_overflowing() {
        let context = CallContext::with_timeout(Duration::MAX);
        let deadline = context.deadline_value().expect("deadline");
        assert!(deadline > tokio::time::Instant::now() + Duration::from_secs(86_400 * 365));
        assert_eq!(context.interruption(), None);
        assert_eq!(
            context.attempt_timeout(Duration::from_secs(5)),
            Some(Duration::from_secs(5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shared_token_cancels_every_context_built_from_it() {
        let token = CancellationToken::new();
        let context = CallContext::from_token(token.clone());
        assert!(context.deadline_value().is_none());
        assert!(!context.cancellation_token().is_cancelled());

        token.cancel();
        assert!(context.cancellation_token().is_cancelled());
        assert_eq!(context.interruption(), Some(Interrupted::Canceled));
        assert_eq!(
            context.sleep(Duration::from_secs(1)).await,
            Err(Interrupted::Canceled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_deadline_is_reported_back() {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(40);
        let context = CallContext::new().deadline(deadline);
        assert_eq!(context.deadline_value(), Some(deadline));
        context.cancel();
        assert!(context.cancellation_token().is_cancelled());
        assert_eq!(context.interruption(), Some(Interrupted::Canceled));
    }
}
