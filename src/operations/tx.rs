//! Transactional operations.

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::operations::{until_canceled, Transaction, TxBeginner, TxOptions};
use crate::resilience::classify::unwrap_bad_connection;
use crate::resilience::errors::{OperationError, RetryError};
use crate::resilience::retries::{retry, RetryOptions};

/// Run `f` inside a fresh transaction per attempt, retrying under `options`.
///
/// A failure in `f` rolls the transaction back before the retry decision;
/// a failed rollback is reported together with the original failure. On
/// success the transaction is committed, and a commit failure is retried
/// like any other.
///
/// A canceled attempt stops `f` and rolls the transaction back.
pub async fn do_tx<D, T, F>(
    token: &CancellationToken,
    db: &D,
    tx_options: &TxOptions,
    options: &RetryOptions,
    f: F,
) -> Result<T, RetryError>
where
    D: TxBeginner,
    F: for<'a> Fn(&'a CancellationToken, &'a mut D::Tx) -> BoxFuture<'a, Result<T, OperationError>>,
{
    let f = &f;
    retry(token, options, move |attempt_token| async move {
        let mut tx = db
            .begin_tx(&attempt_token, tx_options)
            .await
            .map_err(unwrap_bad_connection)?;

        match until_canceled(&attempt_token, f(&attempt_token, &mut tx)).await {
            Ok(value) => {
                tx.commit().await.map_err(unwrap_bad_connection)?;
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => Err(unwrap_bad_connection(err)),
                Err(rollback) => {
                    tracing::warn!(error = %err, rollback_error = %rollback, "Rollback failed");
                    Err(OperationError::rollback_failed(err, rollback))
                }
            },
        }
    })
    .await
}
