//! Cancellation and deadlines for long scans.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{QueryError, QueryResult};

/// Carried through a logical query. Scans call [`QueryContext::check`]
/// before every block they read.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// Never cancelled, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn check(&self) -> QueryResult<()> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(QueryError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_context_fails_check() {
        let token = CancellationToken::new();
        let ctx = QueryContext::with_cancellation(token.clone());
        assert!(ctx.check().is_ok());

        token.cancel();
        assert!(matches!(ctx.check(), Err(QueryError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline_fails_check() {
        let ctx = QueryContext::background().with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(QueryError::DeadlineExceeded)));

        let ctx = QueryContext::background().with_timeout(Duration::from_secs(60));
        assert!(ctx.check().is_ok());
    }
}
