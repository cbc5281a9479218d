use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use super::config::RetryConfig;

/// How the platform failed, which decides whether the call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Explicit backpressure from the platform
    RateLimited,
    /// Network or server-side failure
    Transient,
    /// The platform refused this one request (deleted target, bad payload).
    /// Not retried, and only the event it belongs to fails.
    Rejected,
    /// Authentication or configuration failure, never retried
    Fatal,
}

impl FaultKind {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate limited",
            Self::Transient => "transient",
            Self::Rejected => "rejected",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure reported by a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} fault: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FaultKind::RateLimited, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Transient, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Rejected, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Fatal, message)
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{operation} failed and will not be retried: {fault}")]
    Fatal { operation: String, fault: Fault },

    #[error("{operation} was rejected: {fault}")]
    Rejected { operation: String, fault: Fault },

    #[error("{operation} gave up after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: Fault,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },
}

impl DeliveryError {
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Idle,
    Attempting,
    Backoff { delay: Duration },
    Success,
    Exhausted,
}

/// Progress of one logical operation through its retry budget.
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Zero-based index of the current attempt
    pub attempt: u32,
    pub last_error: Option<FaultKind>,
    pub next_delay: Option<Duration>,
    pub phase: RetryPhase,
}

impl RetryState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attempt: 0,
            last_error: None,
            next_delay: None,
            phase: RetryPhase::Idle,
        }
    }

    pub fn begin_attempt(&mut self) {
        if matches!(self.phase, RetryPhase::Backoff { .. }) {
            self.attempt += 1;
        }
        self.next_delay = None;
        self.phase = RetryPhase::Attempting;
    }

    pub fn succeed(&mut self) {
        self.phase = RetryPhase::Success;
    }

    /// Moves to `Backoff` while budget remains, otherwise to `Exhausted`.
    /// Faults that are not retryable exhaust immediately.
    pub fn fail(&mut self, kind: FaultKind, policy: &RetryPolicy) -> RetryPhase {
        self.last_error = Some(kind);

        self.phase = if !kind.is_retryable() || self.attempt >= policy.max_retries {
            RetryPhase::Exhausted
        } else {
            let delay = policy.delay_for(self.attempt);
            self.next_delay = Some(delay);
            RetryPhase::Backoff { delay }
        };
        self.phase
    }

    #[must_use]
    pub const fn attempts_made(&self) -> u32 {
        self.attempt + 1
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff envelope: `delay = base_delay * 2^attempt`, the same
/// schedule for rate limits and transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `attempt` until it succeeds, hits a fatal fault or uses up the
    /// budget. When `cancel` flips to true (or its sender goes away) no new
    /// attempt is started; the one in flight is left to finish.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: Option<&watch::Receiver<bool>>,
        mut attempt: F,
    ) -> Result<T, DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let mut state = RetryState::new();
        let mut cancel = cancel.cloned();

        loop {
            state.begin_attempt();

            let fault = match attempt().await {
                Ok(value) => {
                    state.succeed();
                    if state.attempt > 0 {
                        tracing::info!(operation, attempts = state.attempts_made(), "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(fault) => fault,
            };

            match state.fail(fault.kind, self) {
                RetryPhase::Backoff { delay } => {
                    tracing::warn!(
                        operation,
                        attempt = state.attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        fault = %fault,
                        "Operation failed, backing off"
                    );
                    if !wait_backoff(delay, cancel.as_mut()).await {
                        tracing::info!(operation, "Retry abandoned on shutdown");
                        return Err(DeliveryError::Cancelled {
                            operation: operation.to_string(),
                        });
                    }
                }
                _ if fault.kind == FaultKind::Fatal => {
                    tracing::error!(operation, fault = %fault, "Operation failed fatally");
                    return Err(DeliveryError::Fatal {
                        operation: operation.to_string(),
                        fault,
                    });
                }
                _ if fault.kind == FaultKind::Rejected => {
                    tracing::warn!(operation, fault = %fault, "Operation rejected");
                    return Err(DeliveryError::Rejected {
                        operation: operation.to_string(),
                        fault,
                    });
                }
                _ => {
                    tracing::error!(
                        operation,
                        attempts = state.attempts_made(),
                        fault = %fault,
                        "Retry budget exhausted"
                    );
                    return Err(DeliveryError::Exhausted {
                        operation: operation.to_string(),
                        attempts: state.attempts_made(),
                        last: fault,
                    });
                }
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.retry_limit, config.base_delay(), config.max_delay())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Sleeps for `delay`. Returns false if the stop signal fires first.
pub(super) async fn wait_backoff(delay: Duration, cancel: Option<&mut watch::Receiver<bool>>) -> bool {
    let Some(rx) = cancel else {
        tokio::time::sleep(delay).await;
        return true;
    };

    if *rx.borrow_and_update() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return true,
            changed = rx.changed() => {
                if changed.is_err() || *rx.borrow_and_update() {
                    return false;
                }
            }
        }
    }
}
