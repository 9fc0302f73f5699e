//! Shared utilities for integration testing.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use cluster_driver::operations::{Transaction, TxBeginner, TxOptions};
use cluster_driver::resilience::backoff::BackoffPolicy;
use cluster_driver::resilience::trace::{NoopTrace, RetryTrace};
use cluster_driver::{DriverConfig, OperationError, RetryError, RetryOption, RetryOptions};

/// Tiny backoff tiers so retry tests finish quickly.
pub fn quick_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(2),
        max: Duration::from_millis(8),
        jitter: 0.5,
    }
}

/// Retry options with quick backoff and no metrics, plus `extra`.
pub fn quick_options(extra: impl IntoIterator<Item = RetryOption>) -> RetryOptions {
    let base = [
        RetryOption::FastBackoff(quick_backoff()),
        RetryOption::SlowBackoff(quick_backoff()),
        RetryOption::Trace(Arc::new(NoopTrace)),
    ];
    RetryOptions::from_options(base.into_iter().chain(extra)).unwrap()
}

/// Driver config over `endpoints` with discovery disabled and quick retries.
pub fn driver_config(endpoints: &[&str]) -> DriverConfig {
    let mut config = DriverConfig::default();
    config.endpoints = endpoints.iter().map(|s| s.to_string()).collect();
    config.discovery.enabled = false;
    config.retry.fast_base_ms = 1;
    config.retry.fast_max_ms = 4;
    config.retry.slow_base_ms = 1;
    config.retry.slow_max_ms = 4;
    config
}

/// Results handed out in order; the last one repeats.
pub struct Script<T> {
    steps: Mutex<VecDeque<Result<T, OperationError>>>,
    calls: AtomicU32,
    make_last: fn() -> Result<T, OperationError>,
}

impl<T> Script<T> {
    pub fn new(
        steps: Vec<Result<T, OperationError>>,
        make_last: fn() -> Result<T, OperationError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            make_last,
        })
    }

    pub fn next(&self) -> Result<T, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(self.make_last)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Records every trace callback.
#[derive(Default)]
pub struct RecordingTrace {
    pub attempts: AtomicU32,
    pub backoffs: Mutex<Vec<Duration>>,
    pub outcomes: Mutex<Vec<(u32, bool)>>,
}

impl RetryTrace for RecordingTrace {
    fn on_attempt(&self, _label: &str, _attempt: u32) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_backoff(&self, _label: &str, _attempt: u32, delay: Duration, _error: &OperationError) {
        self.backoffs.lock().unwrap().push(delay);
    }

    fn on_done(&self, _label: &str, attempts: u32, error: Option<&RetryError>) {
        self.outcomes.lock().unwrap().push((attempts, error.is_none()));
    }
}

/// What a mock transaction does when finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Ok,
    Fail,
}

/// In-memory transactional resource recording begin/commit/rollback.
pub struct MockDb {
    pub journal: Mutex<Vec<String>>,
    pub begun: AtomicU32,
    commit: Mutex<VecDeque<Finish>>,
    rollback: Mutex<VecDeque<Finish>>,
}

impl MockDb {
    pub fn new(commit: Vec<Finish>, rollback: Vec<Finish>) -> Arc<Self> {
        Arc::new(Self {
            journal: Mutex::new(Vec::new()),
            begun: AtomicU32::new(0),
            commit: Mutex::new(commit.into()),
            rollback: Mutex::new(rollback.into()),
        })
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

pub struct MockTx {
    pub id: u32,
    db: Arc<MockDb>,
}

#[async_trait]
impl Transaction for MockTx {
    async fn commit(self) -> Result<(), OperationError> {
        self.db.log(format!("commit {}", self.id));
        let finish = self.db.commit.lock().unwrap().pop_front().unwrap_or(Finish::Ok);
        match finish {
            Finish::Ok => Ok(()),
            Finish::Fail => Err(OperationError::bad_connection("commit on dead connection")),
        }
    }

    async fn rollback(self) -> Result<(), OperationError> {
        self.db.log(format!("rollback {}", self.id));
        let finish = self.db.rollback.lock().unwrap().pop_front().unwrap_or(Finish::Ok);
        match finish {
            Finish::Ok => Ok(()),
            Finish::Fail => Err(OperationError::bad_connection("rollback on dead connection")),
        }
    }
}

/// Begins transactions against a shared [`MockDb`].
pub struct MockBeginner(pub Arc<MockDb>);

#[async_trait]
impl TxBeginner for MockBeginner {
    type Tx = MockTx;

    async fn begin_tx(
        &self,
        _token: &CancellationToken,
        options: &TxOptions,
    ) -> Result<MockTx, OperationError> {
        let id = self.0.begun.fetch_add(1, Ordering::SeqCst);
        self.0.log(format!("begin {id} read_only={}", options.read_only));
        Ok(MockTx {
            id,
            db: self.0.clone(),
        })
    }
}
