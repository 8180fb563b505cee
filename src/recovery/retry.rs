//! Bounded retries with exponential backoff and failure classification.
//!
//! The recovery strategy looked up for each failure is recorded for
//! diagnostics only. The action is repeated unchanged on every attempt.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default number of attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Backoff is `unit * min(2^attempt, MAX_BACKOFF_MULTIPLIER)`.
const MAX_BACKOFF_MULTIPLIER: u32 = 8;

/// Ordered (kind, needles) table. First match wins.
const TAXONOMY: &[(ErrorKind, &[&str])] = &[
    (ErrorKind::Timeout, &["timeout", "timed out", "deadline"]),
    (
        ErrorKind::Connection,
        &["connection", "connect", "network", "unreachable", "refused", "dns"],
    ),
    (
        ErrorKind::Permission,
        &["permission", "denied", "forbidden", "unauthorized", "not allowed"],
    ),
    (ErrorKind::Syntax, &["syntax", "parse", "unexpected token", "invalid json"]),
    (
        ErrorKind::NotFound,
        &["not found", "no such file", "does not exist", "missing", "404"],
    ),
    (
        ErrorKind::Dependency,
        &["module", "import", "dependency", "package", "cannot find"],
    ),
];

/// Implemented by values an action can return while still signalling failure.
pub trait Outcome {
    /// `Some(reason)` when the value reports an unsuccessful result.
    fn failure(&self) -> Option<String> {
        None
    }
}

impl Outcome for () {}

impl Outcome for String {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Permission,
    Syntax,
    NotFound,
    Dependency,
    Unknown,
}

impl ErrorKind {
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        TAXONOMY
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lowered.contains(n)))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    pub fn strategy(&self) -> RecoveryStrategy {
        match self {
            ErrorKind::Timeout | ErrorKind::Connection => RecoveryStrategy::RetryWithBackoff,
            ErrorKind::Permission => RecoveryStrategy::RequestPermission,
            ErrorKind::Syntax => RecoveryStrategy::RegenerateCode,
            ErrorKind::NotFound => RecoveryStrategy::SkipOrAskUser,
            ErrorKind::Dependency => RecoveryStrategy::InstallDependency,
            ErrorKind::Unknown => RecoveryStrategy::AskUser,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    RetryWithBackoff,
    RequestPermission,
    RegenerateCode,
    SkipOrAskUser,
    InstallDependency,
    AskUser,
}

/// Result of a retried action.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: Option<T>,
    pub report: RetryReport,
}

impl<T> RetryOutcome<T> {
    pub fn success(&self) -> bool {
        self.report.success
    }
}

/// Serializable part of a retried action's result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryReport {
    pub action: String,
    pub success: bool,
    pub attempts: u32,
    pub errors: Vec<String>,
    /// Strategy looked up after each non-final failure
    pub strategies: Vec<RecoveryStrategy>,
    pub error_kind: Option<ErrorKind>,
    pub final_strategy: Option<RecoveryStrategy>,
}

/// User-facing summary of an action that exhausted its retries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpRequest {
    pub title: String,
    pub summary: String,
    pub errors: Vec<String>,
    pub error_kind: ErrorKind,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    backoff_unit: Duration,
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Delay after a failed zero-based `attempt`: unit x min(2^attempt, 8).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(attempt)
            .unwrap_or(u32::MAX)
            .min(MAX_BACKOFF_MULTIPLIER);
        self.backoff_unit.saturating_mul(multiplier)
    }

    /// Run `action` with the configured attempt bound.
    pub async fn execute<T, F, Fut>(&self, label: &str, action: F) -> RetryOutcome<T>
    where
        T: Outcome,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_with_retry(label, self.max_attempts, action)
            .await
    }

    /// Run `action` up to `max_attempts` times. The action receives the
    /// zero-based attempt number. An `Err` or a value whose `failure()` is
    /// `Some` counts as a failed attempt.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        label: &str,
        max_attempts: u32,
        mut action: F,
    ) -> RetryOutcome<T>
    where
        T: Outcome,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut errors = Vec::new();
        let mut strategies = Vec::new();

        for attempt in 0..max_attempts {
            let error = match action(attempt).await {
                Ok(value) => match value.failure() {
                    None => {
                        debug!("{} succeeded on attempt {}/{}", label, attempt + 1, max_attempts);
                        return RetryOutcome {
                            value: Some(value),
                            report: RetryReport {
                                action: label.to_string(),
                                success: true,
                                attempts: attempt + 1,
                                errors,
                                strategies,
                                error_kind: None,
                                final_strategy: None,
                            },
                        };
                    }
                    Some(reason) => reason,
                },
                Err(e) => format!("{:#}", e),
            };

            warn!(
                "{} failed on attempt {}/{}: {}",
                label,
                attempt + 1,
                max_attempts,
                error
            );
            errors.push(error);

            if attempt + 1 < max_attempts {
                let kind = ErrorKind::classify(errors.last().map(String::as_str).unwrap_or(""));
                let strategy = kind.strategy();
                strategies.push(strategy);
                let delay = self.backoff_delay(attempt);
                debug!(
                    "{} classified as {:?}, strategy {:?}; retrying in {:?}",
                    label, kind, strategy, delay
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }

        let kind = errors
            .last()
            .map(|e| ErrorKind::classify(e))
            .unwrap_or(ErrorKind::Unknown);

        RetryOutcome {
            value: None,
            report: RetryReport {
                action: label.to_string(),
                success: false,
                attempts: max_attempts,
                errors,
                strategies,
                error_kind: Some(kind),
                final_strategy: Some(kind.strategy()),
            },
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::from_secs(1))
    }
}

impl RetryReport {
    /// Build the "needs help" payload for an exhausted action.
    pub fn help_request(&self, task: &str) -> HelpRequest {
        let kind = self.error_kind.unwrap_or(ErrorKind::Unknown);
        let last = self.errors.last().cloned().unwrap_or_default();
        HelpRequest {
            title: format!("Could not complete: {}", task),
            summary: format!(
                "'{}' failed after {} attempt(s). Last error: {}",
                self.action, self.attempts, last
            ),
            errors: self.errors.clone(),
            error_kind: kind,
            suggestions: suggestions_for(kind),
        }
    }
}

fn suggestions_for(kind: ErrorKind) -> Vec<String> {
    let specific: &[&str] = match kind {
        ErrorKind::Timeout => &["The service is slow right now; try again in a few minutes."],
        ErrorKind::Connection => &["Check the network connection and the generation endpoint URL."],
        ErrorKind::Permission => &["Check file permissions in the workspace directory."],
        ErrorKind::Syntax => &["Rephrase the request with more detail so the code can be regenerated."],
        ErrorKind::NotFound => &["Confirm that the referenced file exists in the project."],
        ErrorKind::Dependency => &["Install the missing dependency manually and retry."],
        ErrorKind::Unknown => &[],
    };
    specific
        .iter()
        .chain(
            [
                "Split the request into smaller steps.",
                "Send the request again, or reset the session to start over.",
            ]
            .iter(),
        )
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flagged(bool);

    impl Outcome for Flagged {
        fn failure(&self) -> Option<String> {
            (!self.0).then(|| "flagged unsuccessful".to_string())
        }
    }

    fn executor() -> RetryExecutor {
        RetryExecutor::new(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let outcome = executor()
            .execute_with_retry("flaky", 3, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        anyhow::bail!("connection reset");
                    }
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.success());
        assert_eq!(outcome.report.attempts, 3);
        assert_eq!(outcome.report.errors.len(), 2);
        assert_eq!(
            outcome.report.strategies,
            vec![RecoveryStrategy::RetryWithBackoff; 2]
        );
    }

    #[tokio::test]
    async fn test_always_fails() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = executor()
            .execute_with_retry("broken", 3, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("permission denied")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!outcome.success());
        assert_eq!(outcome.report.attempts, 3);
        assert_eq!(outcome.report.errors.len(), 3);
        assert_eq!(
            outcome.report.final_strategy,
            Some(RecoveryStrategy::RequestPermission)
        );

        let help = outcome.report.help_request("write index.html");
        assert_eq!(help.error_kind, ErrorKind::Permission);
        assert!(help.suggestions.len() >= 3);
    }

    #[tokio::test]
    async fn test_flagged_result_counts_as_failure() {
        let calls = AtomicU32::new(0);
        let outcome = executor()
            .execute("flagged", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Flagged(n == 1)) }
            })
            .await;
        assert!(outcome.success());
        assert_eq!(outcome.report.attempts, 2);
        assert_eq!(outcome.report.errors, vec!["flagged unsuccessful"]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let executor = RetryExecutor::new(5, Duration::from_secs(1));
        let delays: Vec<u64> = (0..6).map(|a| executor.backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_classification_taxonomy() {
        assert_eq!(ErrorKind::classify("Request timed out"), ErrorKind::Timeout);
        assert_eq!(ErrorKind::classify("Connection refused"), ErrorKind::Connection);
        assert_eq!(ErrorKind::classify("SyntaxError: bad"), ErrorKind::Syntax);
        assert_eq!(ErrorKind::classify("No such file"), ErrorKind::NotFound);
        assert_eq!(ErrorKind::classify("ModuleNotFoundError"), ErrorKind::Dependency);
        assert_eq!(ErrorKind::classify("weird"), ErrorKind::Unknown);
        assert_eq!(ErrorKind::NotFound.strategy(), RecoveryStrategy::SkipOrAskUser);
    }
}
