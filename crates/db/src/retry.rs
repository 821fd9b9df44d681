//! Bounded-retry connection establishment.

use crate::error::{DbError, DbResult};
use std::time::Duration;

/// Connection attempt budget: `attempts` tries, `interval` apart.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(1),
        }
    }
}

/// Call `connect` up to `policy.attempts` times.
///
/// A `BadParameters` failure short-circuits immediately, since retrying
/// with the same credentials cannot help. After the last failed attempt the
/// caller-supplied failure hook runs exactly once and the result is
/// `Unavailable`.
pub async fn connect_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    on_failure: impl FnOnce(),
    connect: F,
) -> DbResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        tracing::debug!(attempt, attempts, "store connection attempt");
        match connect(attempt).await {
            Ok(value) => return Ok(value),
            Err(e @ DbError::BadParameters(_)) => {
                tracing::error!(error = %e, "invalid store parameters, not retrying");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "store connection failed");
                if attempt < attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }

    on_failure();
    Err(DbError::Unavailable { attempts })
}

/// Sort a connection-time sqlx error into the retry taxonomy.
///
/// Authentication and unknown-database failures are `BadParameters`;
/// everything else is treated as transient.
pub fn classify_connect_error(e: sqlx::Error) -> DbError {
    match &e {
        sqlx::Error::Configuration(_) => DbError::BadParameters(e.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            // 28xxx: invalid authorization; 3D000: unknown database.
            if code.starts_with("28") || code == "3D000" {
                DbError::BadParameters(e.to_string())
            } else {
                DbError::Database(e)
            }
        }
        _ => DbError::Database(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_exactly_n_attempts_then_hook() {
        let calls = Arc::new(AtomicU32::new(0));
        let hook_fired = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let hook_in = hook_fired.clone();
        let result: DbResult<()> = connect_with_retry(
            counting_policy(4),
            move || {
                hook_in.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DbError::Internal("refused".to_string()))
                }
            },
        )
        .await;

        assert!(matches!(result, Err(DbError::Unavailable { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(hook_fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result = connect_with_retry(
            counting_policy(5),
            || panic!("hook must not fire"),
            move |attempt| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(DbError::Internal("refused".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_configuration_errors_classify_as_bad_parameters() {
        let e = classify_connect_error(sqlx::Error::Configuration("bad dsn".into()));
        assert!(matches!(e, DbError::BadParameters(_)));

        let e = classify_connect_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(e, DbError::Database(_)));
    }

    #[tokio::test]
    async fn test_bad_parameters_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: DbResult<()> = connect_with_retry(
            counting_policy(5),
            || panic!("hook must not fire"),
            move |_| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DbError::BadParameters("wrong password".to_string()))
                }
            },
        )
        .await;

        assert!(matches!(result, Err(DbError::BadParameters(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
