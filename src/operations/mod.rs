//! Operation adapters.
//!
//! # Data Flow
//! ```text
//! caller closure
//!     → do_with_session / do_tx (per attempt: acquire or begin)
//!     → closure runs against the session or transaction
//!     → release / discard, or commit / rollback
//!     → error unwrapped and handed to the retry engine
//! ```
//!
//! # Design Decisions
//! - Closures see a session or transaction, never retry policy
//! - A bad-connection failure discards the session instead of returning it
//! - Exactly one of commit or rollback runs for every begun transaction
//! - A canceled attempt stops the closure, then still finishes the
//!   transaction or returns the session before it completes

pub mod plain;
pub mod tx;

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::resilience::errors::{OperationError, TransportCode};

pub use plain::do_with_session;
pub use tx::do_tx;

/// Run the caller's closure until it finishes or the attempt is canceled.
async fn until_canceled<T>(
    token: &CancellationToken,
    work: impl Future<Output = Result<T, OperationError>>,
) -> Result<T, OperationError> {
    tokio::select! {
        biased;
        result = work => result,
        _ = token.cancelled() => Err(OperationError::transport(
            TransportCode::Canceled,
            "attempt canceled",
        )),
    }
}

/// Hands out connection-scoped sessions, one per attempt.
#[async_trait]
pub trait SessionPool: Send + Sync {
    type Session: Send;

    async fn acquire(&self, token: &CancellationToken) -> Result<Self::Session, OperationError>;

    /// Return a healthy session for reuse.
    fn release(&self, session: Self::Session);

    /// Return a session whose attempt failed with a retryable error that
    /// left the connection intact.
    fn release_failed(&self, session: Self::Session) {
        self.release(session);
    }

    /// Throw away a session whose connection must not be reused.
    fn discard(&self, session: Self::Session);
}

/// Starts transactions, one per attempt.
#[async_trait]
pub trait TxBeginner: Send + Sync {
    type Tx: Transaction;

    async fn begin_tx(
        &self,
        token: &CancellationToken,
        options: &TxOptions,
    ) -> Result<Self::Tx, OperationError>;
}

/// A begun transaction. Unusable resources are reported as
/// [`OperationError::BadConnection`].
#[async_trait]
pub trait Transaction: Send {
    async fn commit(self) -> Result<(), OperationError>;

    async fn rollback(self) -> Result<(), OperationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

/// Settings for [`TxBeginner::begin_tx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }
}
