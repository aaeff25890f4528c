//! Retry policy for outbound operations.
//!
//! Only delivery is retried: one immediate second attempt after a transient
//! transport failure. Resolution is never retried here; the requester can
//! simply send the link again.

use std::future::Future;

/// Classification of an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network hiccup, timeout, remote 5xx.
    Transient,
    /// Retrying cannot help (payload too large, rejected by the remote).
    Permanent,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Two attempts, the second right after the first.
    pub fn delivery() -> Self {
        Self { max_attempts: 2 }
    }

    /// Whether a failure on `attempt` (1-based) earns another attempt.
    pub fn should_retry(&self, attempt: u32, kind: ErrorKind) -> bool {
        kind == ErrorKind::Transient && attempt < self.max_attempts
    }
}

/// Runs `f` until it succeeds or the policy says to stop. Returns the last
/// error together with the number of attempts made.
pub async fn run_with_retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    classify: C,
    mut f: F,
) -> Result<T, (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorKind,
{
    let mut attempt = 1u32;
    loop {
        match f(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if policy.should_retry(attempt, classify(&e)) => attempt += 1,
            Err(e) => return Err((e, attempt)),
        }
    }
}
