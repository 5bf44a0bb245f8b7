//! The capability the orchestrator drives: one remote call per target.

use std::fmt;
use std::time::Duration;

use tracing::warn;

use super::run::Target;

// ---------------------------------------------------------------------------
// InvocationError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationErrorKind {
    /// The call did not answer within the invoker's own deadline.
    Timeout,
    /// Connection, DNS or TLS failure before a response arrived.
    Transport,
    /// The remote service asked us to slow down.
    RateLimited,
    /// 5xx from the remote service.
    Server,
    /// The remote service refused this target (4xx, validation, conflict).
    Rejected,
}

/// Failure of a single target. Never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationError {
    pub kind: InvocationErrorKind,
    pub message: String,
}

impl InvocationError {
    pub fn new(kind: InvocationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(InvocationErrorKind::Rejected, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(InvocationErrorKind::Timeout, message)
    }

    /// Whether trying the same call again could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self.kind, InvocationErrorKind::Rejected)
    }

    /// Whether the remote side may have applied the call before it failed.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self.kind, InvocationErrorKind::Timeout)
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            InvocationErrorKind::Timeout => write!(f, "timed out: {}", self.message),
            InvocationErrorKind::Transport => write!(f, "network error: {}", self.message),
            InvocationErrorKind::RateLimited => write!(f, "rate limited: {}", self.message),
            InvocationErrorKind::Server => write!(f, "server error: {}", self.message),
            InvocationErrorKind::Rejected => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for InvocationError {}

pub type InvokeResult = std::result::Result<serde_json::Value, InvocationError>;

// ---------------------------------------------------------------------------
// ActionInvoker
// ---------------------------------------------------------------------------

/// Performs exactly one remote create/update for one target.
///
/// The returned JSON is stored verbatim as the target's success result.
pub trait ActionInvoker {
    /// Stable name recorded in the run, e.g. `create-repository`.
    ///
    /// `resume` refuses to continue a run with an invoker of another name.
    fn action(&self) -> &str;

    fn invoke(&self, target: &Target) -> InvokeResult;

    /// Whether repeating a call that may already have landed is harmless.
    ///
    /// Creates return `false`: a timed-out POST is not retried in place and
    /// is left for `resume`, where the invoker can detect its own earlier
    /// success.
    fn idempotent(&self) -> bool {
        true
    }
}

impl<I: ActionInvoker + ?Sized> ActionInvoker for Box<I> {
    fn action(&self) -> &str {
        (**self).action()
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        (**self).invoke(target)
    }

    fn idempotent(&self) -> bool {
        (**self).idempotent()
    }
}

impl<I: ActionInvoker + ?Sized> ActionInvoker for &I {
    fn action(&self) -> &str {
        (**self).action()
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        (**self).invoke(target)
    }

    fn idempotent(&self) -> bool {
        (**self).idempotent()
    }
}

// ---------------------------------------------------------------------------
// FnInvoker
// ---------------------------------------------------------------------------

/// Adapts a closure into an `ActionInvoker`.
pub struct FnInvoker<F> {
    action: String,
    idempotent: bool,
    f: F,
}

impl<F> FnInvoker<F> {
    /// Mark the closure as a create whose timeouts must not be retried.
    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }
}

pub fn from_fn<F>(action: impl Into<String>, f: F) -> FnInvoker<F>
where
    F: Fn(&Target) -> InvokeResult,
{
    FnInvoker {
        action: action.into(),
        idempotent: true,
        f,
    }
}

impl<F> ActionInvoker for FnInvoker<F>
where
    F: Fn(&Target) -> InvokeResult,
{
    fn action(&self) -> &str {
        &self.action
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        (self.f)(target)
    }

    fn idempotent(&self) -> bool {
        self.idempotent
    }
}

// ---------------------------------------------------------------------------
// Retrying
// ---------------------------------------------------------------------------

/// Retries transient failures of the wrapped invoker with exponential backoff.
///
/// Attempt `n` (0-based) that fails transiently waits `base_delay * 2^n`
/// before the next one. `Rejected` errors are returned immediately, as are
/// timeouts of a non-idempotent invoker. To the orchestrator the whole
/// sequence is still a single invocation.
pub struct Retrying<I> {
    inner: I,
    max_attempts: u32,
    base_delay: Duration,
}

impl<I: ActionInvoker> Retrying<I> {
    pub fn new(inner: I, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl<I: ActionInvoker> ActionInvoker for Retrying<I> {
    fn action(&self) -> &str {
        self.inner.action()
    }

    fn idempotent(&self) -> bool {
        self.inner.idempotent()
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        let idempotent = self.inner.idempotent();
        let mut attempt = 0;
        loop {
            match self.inner.invoke(target) {
                Ok(v) => return Ok(v),
                Err(e) if e.outcome_unknown() && !idempotent => {
                    warn!(
                        target_id = %target.id,
                        error = %e,
                        "not retrying a create whose outcome is unknown"
                    );
                    return Err(e);
                }
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        target_id = %target.id,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient failure"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
