use std::time::{Duration, Instant};

use tidemark_common::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation signal for driver operations.
///
/// The default context never expires. Clones share the same token, so a
/// caller can keep one and cancel from another thread while the driver works.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// Use an existing token, e.g. one shared with the orchestration engine.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with the matching cancellation kind once the context is done.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Err(Error::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Error to report for an operation the backend aborted on our behalf.
    pub fn interruption(&self) -> Error {
        if self.token.is_cancelled() {
            Error::Cancelled
        } else {
            Error::DeadlineExceeded
        }
    }
}
