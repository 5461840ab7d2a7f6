//! Side effects whose failure must not fail the caller.

use std::fmt::Display;
use std::future::Future;

/// Await `fut`; on error, log a warning naming `operation` and carry on.
///
/// Use for audit writes and cache invalidation, never for state transitions.
pub async fn best_effort<T, E, Fut>(operation: &'static str, fut: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(operation, error = %e, "best-effort operation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn swallows_errors() {
        let out = best_effort("noop", async { Err::<(), _>("boom") }).await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn passes_values_through() {
        let out = best_effort("noop", async { Ok::<_, String>(7) }).await;
        assert_eq!(out, Some(7));
    }
}
