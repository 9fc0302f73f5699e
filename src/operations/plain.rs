//! Session-scoped operations.

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::operations::{until_canceled, SessionPool};
use crate::resilience::classify::{classify, unwrap_bad_connection};
use crate::resilience::errors::{OperationError, RetryError};
use crate::resilience::retries::{retry, RetryOptions};

/// Run `f` against a fresh session per attempt, retrying under `options`.
///
/// Sessions that served a connection-invalidating failure are discarded;
/// all others go back to the pool, flagged when the failure was retryable.
pub async fn do_with_session<P, T, F>(
    token: &CancellationToken,
    pool: &P,
    options: &RetryOptions,
    f: F,
) -> Result<T, RetryError>
where
    P: SessionPool,
    F: for<'a> Fn(&'a CancellationToken, &'a mut P::Session) -> BoxFuture<'a, Result<T, OperationError>>,
{
    let f = &f;
    retry(token, options, move |attempt_token| async move {
        let mut session = pool
            .acquire(&attempt_token)
            .await
            .map_err(unwrap_bad_connection)?;

        match until_canceled(&attempt_token, f(&attempt_token, &mut session)).await {
            Ok(value) => {
                pool.release(session);
                Ok(value)
            }
            Err(err) => {
                let err = unwrap_bad_connection(err);
                let verdict = classify(&err);
                if verdict.invalidates_connection {
                    tracing::debug!(error = %err, "Discarding session");
                    pool.discard(session);
                } else if verdict.retryable {
                    pool.release_failed(session);
                } else {
                    pool.release(session);
                }
                Err(err)
            }
        }
    })
    .await
}
