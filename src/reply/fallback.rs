//! Model fallback: try provider/model pairs in order until one succeeds

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::ModelRef;
use crate::{Error, Result};

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackAttempt {
    pub provider: String,
    pub model: String,
    pub error: String,
}

/// Successful fallback run
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    /// Value produced by the winning attempt
    pub result: T,
    /// Provider that produced it
    pub provider: String,
    /// Model that produced it
    pub model: String,
    /// Attempts that failed before the winner
    pub attempts: Vec<FallbackAttempt>,
}

/// Build the ordered candidate list for a run
///
/// The run's own model comes first, then the configured fallbacks, then the
/// agent default. Later duplicates are dropped so no pair runs twice.
#[must_use]
pub fn resolve_fallback_candidates(
    primary: &ModelRef,
    default_model: Option<&ModelRef>,
    fallbacks: &[ModelRef],
) -> Vec<ModelRef> {
    let mut candidates: Vec<ModelRef> = Vec::with_capacity(fallbacks.len() + 2);
    let ordered = std::iter::once(primary)
        .chain(fallbacks.iter())
        .chain(default_model);

    for candidate in ordered {
        if candidate.provider.is_empty() || candidate.model.is_empty() {
            continue;
        }
        if !candidates.contains(candidate) {
            candidates.push(candidate.clone());
        }
    }
    candidates
}

/// Run `run` against each candidate until one succeeds
///
/// Each attempt gets its own `timeout`; `Duration::ZERO` disables the limit.
/// An attempt that times out counts as that pair's failure. An abort is
/// returned immediately and never retried on the next pair.
///
/// # Errors
///
/// Returns `Error::FallbackExhausted` carrying every attempt and the last
/// error when no candidate succeeds, `Error::Aborted` when an attempt was
/// aborted, or `Error::Config` when `candidates` is empty
pub async fn run_with_model_fallback<T, F, Fut>(
    candidates: &[ModelRef],
    timeout: Duration,
    mut run: F,
) -> Result<FallbackOutcome<T>>
where
    F: FnMut(ModelRef) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if candidates.is_empty() {
        return Err(Error::Config("no model candidates configured".to_string()));
    }

    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let mut attempts = Vec::new();
    let mut last_error = None;

    for candidate in candidates {
        let attempt = run(candidate.clone());
        let outcome = if timeout.is_zero() {
            attempt.await
        } else {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout(timeout_ms)),
            }
        };

        match outcome {
            Ok(result) => {
                if !attempts.is_empty() {
                    tracing::info!(
                        model = %candidate,
                        failed = attempts.len(),
                        "fallback model succeeded"
                    );
                }
                return Ok(FallbackOutcome {
                    result,
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    attempts,
                });
            }
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                tracing::warn!(model = %candidate, error = %e, "model attempt failed");
                attempts.push(FallbackAttempt {
                    provider: candidate.provider.clone(),
                    model: candidate.model.clone(),
                    error: e.to_string(),
                });
                last_error = Some(e);
            }
        }
    }

    let last = last_error.unwrap_or_else(|| Error::Agent("no attempt ran".to_string()));
    Err(Error::FallbackExhausted {
        attempts,
        last: Box::new(last),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn pair(provider: &str, model: &str) -> ModelRef {
        ModelRef::new(provider, model)
    }

    #[test]
    fn candidates_keep_order_and_dedupe() {
        let primary = pair("anthropic", "claude");
        let default = pair("anthropic", "claude");
        let fallbacks = vec![pair("openai", "gpt-5"), pair("openai", "gpt-5"), pair("google", "gemini")];

        let candidates = resolve_fallback_candidates(&primary, Some(&default), &fallbacks);
        let keys: Vec<_> = candidates.iter().map(ModelRef::key).collect();
        assert_eq!(keys, vec!["anthropic/claude", "openai/gpt-5", "google/gemini"]);
    }

    #[tokio::test]
    async fn tries_in_order_until_success() {
        let tried = Mutex::new(Vec::new());
        let candidates = vec![pair("a", "1"), pair("b", "2"), pair("c", "3")];

        let outcome = run_with_model_fallback(&candidates, Duration::ZERO, |m| {
            tried.lock().unwrap().push(m.key());
            async move {
                if m.provider == "b" {
                    Ok("ok")
                } else {
                    Err(Error::Agent(format!("{} down", m.provider)))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(*tried.lock().unwrap(), vec!["a/1", "b/2"]);
        assert_eq!(outcome.provider, "b");
        assert_eq!(outcome.model, "2");
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].error, "agent error: a down");
    }

    #[tokio::test]
    async fn exhaustion_carries_last_error() {
        let candidates = vec![pair("a", "1"), pair("b", "2")];
        let err = run_with_model_fallback(&candidates, Duration::ZERO, |m| async move {
            Err::<(), _>(Error::Agent(format!("{} failed", m.provider)))
        })
        .await
        .unwrap_err();

        let Error::FallbackExhausted { attempts, last } = err else {
            panic!("expected exhaustion");
        };
        assert_eq!(attempts.len(), 2);
        assert_eq!(last.to_string(), "agent error: b failed");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_moves_to_next_pair() {
        let candidates = vec![pair("slow", "1"), pair("fast", "2")];
        let outcome = run_with_model_fallback(&candidates, Duration::from_secs(5), |m| async move {
            if m.provider == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(m.provider)
        })
        .await
        .unwrap();

        assert_eq!(outcome.result, "fast");
        assert_eq!(outcome.attempts[0].error, "agent attempt timed out after 5000 ms");
    }

    #[tokio::test]
    async fn abort_is_not_retried() {
        let calls = Mutex::new(0);
        let candidates = vec![pair("a", "1"), pair("b", "2")];
        let err = run_with_model_fallback(&candidates, Duration::ZERO, |_| {
            *calls.lock().unwrap() += 1;
            async { Err::<(), _>(Error::Aborted("user stop".to_string())) }
        })
        .await
        .unwrap_err();

        assert!(err.is_abort());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_candidates_is_config_error() {
        let err = run_with_model_fallback(&[], Duration::ZERO, |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
