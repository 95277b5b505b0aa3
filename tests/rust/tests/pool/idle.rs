//! Idle policy tests

use pretty_assertions::assert_eq;
use std::time::Duration;
use tests::{running_pool, ConnectionState, IdlePolicy, MockLauncher, PoolSettings};

#[tokio::test]
async fn test_keep_alive_holds_idle_connection() {
    let launcher = MockLauncher::new();
    let pool = running_pool(&launcher, PoolSettings::default(), &["fs"]);

    pool.acquire("fs").await.unwrap().release().await.unwrap();
    pool.acquire("fs").await.unwrap().release().await.unwrap();

    assert_eq!(launcher.launches("fs"), 1);
    assert_eq!(pool.cleanup_idle().await, 0);
    assert_eq!(
        pool.connection_info("fs").unwrap().state,
        ConnectionState::Ready
    );
}

#[tokio::test]
async fn test_close_when_idle_closes_at_zero_references() {
    let launcher = MockLauncher::new();
    let settings = PoolSettings::default().with_idle_policy(IdlePolicy::CloseWhenIdle);
    let pool = running_pool(&launcher, settings, &["fs"]);

    let first = pool.acquire("fs").await.unwrap();
    let second = pool.acquire("fs").await.unwrap();

    first.release().await.unwrap();
    let session = launcher.last_session("fs").unwrap();
    assert_eq!(session.closes(), 0);

    second.release().await.unwrap();
    assert_eq!(session.closes(), 1);
    assert_eq!(
        pool.connection_info("fs").unwrap().state,
        ConnectionState::Closed
    );

    // Next use reconnects
    let again = pool.acquire("fs").await.unwrap();
    assert_eq!(launcher.launches("fs"), 2);
    assert_eq!(again.generation(), 2);
    again.release().await.unwrap();
}

#[tokio::test]
async fn test_close_when_idle_on_drop() {
    let launcher = MockLauncher::new();
    let settings = PoolSettings::default().with_idle_policy(IdlePolicy::CloseWhenIdle);
    let pool = running_pool(&launcher, settings, &["fs"]);

    drop(pool.acquire("fs").await.unwrap());

    let session = launcher.last_session("fs").unwrap();
    tests::wait_until(|| session.closes() == 1).await;
    tests::wait_until(|| pool.connection_info("fs").unwrap().state == ConnectionState::Closed)
        .await;
}

#[tokio::test]
async fn test_idle_timeout_reaps_unreferenced_connections() {
    let launcher = MockLauncher::new();
    let settings = PoolSettings::default()
        .with_idle_policy(IdlePolicy::IdleTimeout(Duration::from_millis(30)));
    let pool = running_pool(&launcher, settings, &["idle", "busy"]);

    pool.acquire("idle").await.unwrap().release().await.unwrap();
    let busy = pool.acquire("busy").await.unwrap();

    assert_eq!(pool.cleanup_idle().await, 0);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(pool.cleanup_idle().await, 1);

    assert_eq!(launcher.last_session("idle").unwrap().closes(), 1);
    assert_eq!(launcher.last_session("busy").unwrap().closes(), 0);
    assert_eq!(
        pool.connection_info("idle").unwrap().state,
        ConnectionState::Closed
    );
    assert_eq!(
        pool.connection_info("busy").unwrap().state,
        ConnectionState::Ready
    );

    busy.release().await.unwrap();
    pool.acquire("idle").await.unwrap().release().await.unwrap();
    assert_eq!(launcher.launches("idle"), 2);
}
