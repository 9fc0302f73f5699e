//! Driver facade scenarios: selection, leases, child drivers, discovery.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use cluster_driver::conn::{Conn, ConnState};
use cluster_driver::discovery::{Discovery, DiscoveryError, FileDiscovery};
use cluster_driver::load_balancer::NextOption;
use cluster_driver::{Driver, DriverError, DriverOption, OperationError, RetryError, RetryOption};

mod common;
use common::driver_config;

#[tokio::test]
async fn test_run_hands_out_leases() {
    let token = CancellationToken::new();
    let driver = Driver::connect_static(&token, driver_config(&["a:1", "b:1"]))
        .await
        .unwrap();

    let address = driver
        .run(&token, &driver.retry_options(), |_, lease| {
            let address = lease.address().to_string();
            let active = lease.active_leases();
            async move {
                assert_eq!(active, 1);
                Ok(address)
            }
            .boxed()
        })
        .await
        .unwrap();

    let endpoint = driver.pool().get(&address).unwrap();
    assert_eq!(endpoint.active_leases(), 0);
    assert_eq!(endpoint.state(), ConnState::Online);
    driver.close();
}

#[tokio::test]
async fn test_bad_connection_bans_endpoint_and_moves_on() {
    let token = CancellationToken::new();
    let driver = Driver::connect_static(&token, driver_config(&["a:1", "b:1"]))
        .await
        .unwrap();

    let served_by = driver
        .run(&token, &driver.retry_options(), |_, lease| {
            let address = lease.address().to_string();
            async move {
                if address == "a:1" {
                    Err(OperationError::bad_connection("socket closed"))
                } else {
                    Ok(address)
                }
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(served_by, "b:1");
    assert_eq!(driver.pool().discarded(), 1);
    assert_eq!(driver.pool().get("a:1").unwrap().state(), ConnState::Banned);
    driver.close();
}

#[tokio::test]
async fn test_banned_endpoint_only_with_accept_banned() {
    let token = CancellationToken::new();
    let driver = Driver::connect_static(&token, driver_config(&["a:1", "b:1", "c:1"]))
        .await
        .unwrap();
    let pool = driver.pool();
    pool.get("a:1").unwrap().set_state(ConnState::Online);
    pool.get("b:1").unwrap().set_state(ConnState::Banned);
    pool.get("c:1").unwrap().set_state(ConnState::Offline);

    let strict = driver.next_options([]);
    let picked: HashSet<String> = (0..30)
        .filter_map(|_| driver.next_conn(&token, &strict))
        .map(|c| c.address.clone())
        .collect();
    assert!(!picked.contains("b:1"));
    assert_eq!(picked.len(), 2);

    pool.get("a:1").unwrap().set_state(ConnState::Destroyed);
    pool.get("c:1").unwrap().set_state(ConnState::Destroyed);
    assert!(driver.next_conn(&token, &strict).is_none());

    let tolerant = driver.next_options([NextOption::AcceptBanned(true)]);
    assert_eq!(driver.next_conn(&token, &tolerant).unwrap().address, "b:1");
    driver.close();
}

#[tokio::test]
async fn test_no_connection_is_retried_then_reported() {
    let token = CancellationToken::new();
    let driver = Driver::connect_static(&token, driver_config(&["a:1"]))
        .await
        .unwrap();
    driver.pool().get("a:1").unwrap().ban();

    let options = driver
        .retry_options()
        .with_options([RetryOption::MaxAttempts(3)])
        .unwrap();
    let err = driver
        .run(&token, &options, |_, _| async { Ok(()) }.boxed())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RetryError::AttemptsExhausted {
            attempts: 3,
            source: OperationError::NoConnection,
        }
    ));
    driver.close();
}

#[tokio::test]
async fn test_lease_limit_reports_pool_exhausted() {
    let token = CancellationToken::new();
    let mut config = driver_config(&["a:1"]);
    config.pool.max_leases_per_endpoint = 1;
    let driver = Driver::connect_static(&token, config).await.unwrap();

    let a = driver.pool().get("a:1").unwrap();
    let _held = driver.pool().lease(&a).unwrap();

    let options = driver
        .retry_options()
        .with_options([RetryOption::MaxAttempts(2)])
        .unwrap();
    let err = driver
        .run(&token, &options, |_, _| async { Ok(()) }.boxed())
        .await
        .unwrap_err();

    assert!(matches!(
        err.operation_error(),
        Some(OperationError::PoolExhausted { address }) if address == "a:1"
    ));
    driver.close();
}

#[tokio::test]
async fn test_children_share_pool_and_close_with_parent() {
    let token = CancellationToken::new();
    let root = Driver::connect_static(&token, driver_config(&["a:1"]))
        .await
        .unwrap();

    let child = root
        .with(
            &token,
            [DriverOption::Retry(RetryOption::Label("reads".to_string()))],
        )
        .await
        .unwrap();
    assert!(Arc::ptr_eq(root.pool(), child.pool()));
    assert_eq!(child.retry_options().label, "reads");
    assert_eq!(root.retry_options().label, "operation");

    root.pool().sync(&["a:1".to_string(), "b:1".to_string()]);
    assert_eq!(child.endpoints().len(), 2);

    root.close();
    root.close();
    assert!(child.is_closed());

    let err = child
        .run(&token, &child.retry_options(), |_, _| async { Ok(()) }.boxed())
        .await
        .unwrap_err();
    assert!(matches!(err, RetryError::Failed { attempts: 1, .. }));
}

#[tokio::test]
async fn test_with_on_canceled_token_fails() {
    let token = CancellationToken::new();
    let root = Driver::connect_static(&token, driver_config(&["a:1"]))
        .await
        .unwrap();

    let canceled = CancellationToken::new();
    canceled.cancel();
    assert!(matches!(
        root.with(&canceled, []).await,
        Err(DriverError::Canceled)
    ));
    assert_eq!(root.children(), 0);
    root.close();
}

#[tokio::test]
async fn test_file_discovery_refresh() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "endpoints = [\"a:1\"]").unwrap();
    file.flush().unwrap();

    let mut config = driver_config(&[]);
    config.discovery.enabled = true;
    let token = CancellationToken::new();
    let driver = Driver::connect(&token, config, Arc::new(FileDiscovery::new(file.path())))
        .await
        .unwrap();
    assert_eq!(driver.endpoints().len(), 1);

    std::fs::write(file.path(), "endpoints = [\"a:1\", \"b:1\"]\n").unwrap();
    assert!(driver.refresh());

    for _ in 0..100 {
        if driver.endpoints().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let addresses: Vec<String> = driver.endpoints().into_iter().map(|e| e.address).collect();
    assert_eq!(addresses, vec!["a:1", "b:1"]);

    token.cancel();
    driver.close();
}

struct CountingDiscovery {
    calls: AtomicU32,
}

#[async_trait]
impl Discovery for CountingDiscovery {
    async fn discover(&self, _token: &CancellationToken) -> Result<Vec<String>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["a:1".to_string()])
    }
}

#[tokio::test]
async fn test_dropped_driver_stops_discovery_worker() {
    let discovery = Arc::new(CountingDiscovery {
        calls: AtomicU32::new(0),
    });
    let mut config = driver_config(&[]);
    config.discovery.enabled = true;
    config.discovery.interval_secs = 1;

    let token = CancellationToken::new();
    let driver = Driver::connect(&token, config, discovery.clone())
        .await
        .unwrap();
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
    drop(driver);

    // the worker owns the other reference to the discovery source
    for _ in 0..100 {
        if Arc::strong_count(&discovery) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(Arc::strong_count(&discovery), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
}

