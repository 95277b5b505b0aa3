//! Concurrent acquisition and cancellation tests

use futures::future::join_all;
use futures::poll;
use pretty_assertions::assert_eq;
use std::task::Poll;
use std::time::Duration;
use tests::{
    running_pool, wait_until, ConnectionState, ErrorKind, MockLauncher, PoolSettings,
    ServerDefinition, SessionOptions,
};

// ============================================================================
// Single connect under concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_acquires_share_one_connect() {
    let launcher = MockLauncher::new();
    launcher.gate("fs");
    let pool = running_pool(&launcher, PoolSettings::default(), &["fs"]);

    let (first, second, ()) = tokio::join!(pool.acquire("fs"), pool.acquire("fs"), async {
        wait_until(|| {
            launcher.launches("fs") == 1
                && pool.connection_info("fs").is_some_and(|info| info.waiters == 2)
        })
        .await;
        launcher.open_gate();
    });

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(launcher.launches("fs"), 1);
    let info = pool.connection_info("fs").unwrap();
    assert_eq!(info.ref_count, 2);
    assert_eq!(info.waiters, 0);
    assert_eq!(info.state, ConnectionState::Ready);

    first.release().await.unwrap();
    second.release().await.unwrap();
    let info = pool.connection_info("fs").unwrap();
    assert_eq!(info.ref_count, 0);
    assert_eq!(info.state, ConnectionState::Ready);

    pool.stop().await.unwrap();
    assert_eq!(launcher.last_session("fs").unwrap().closes(), 1);
}

#[tokio::test]
async fn test_many_concurrent_acquires_one_launch() {
    let launcher = MockLauncher::new();
    let pool = running_pool(&launcher, PoolSettings::default(), &["fs"]);

    let sessions: Vec<_> = join_all((0..16).map(|_| pool.acquire("fs")))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(launcher.launches("fs"), 1);
    assert_eq!(pool.connection_info("fs").unwrap().ref_count, 16);

    drop(sessions);
    assert_eq!(pool.connection_info("fs").unwrap().ref_count, 0);
}

#[tokio::test]
async fn test_connect_failure_reaches_every_waiter() {
    let launcher = MockLauncher::new();
    launcher.gate("bad");
    launcher.fail("bad", "no such binary");
    let pool = running_pool(&launcher, PoolSettings::default(), &["bad"]);

    let (first, second, ()) = tokio::join!(pool.acquire("bad"), pool.acquire("bad"), async {
        wait_until(|| pool.connection_info("bad").is_some_and(|info| info.waiters == 2)).await;
        launcher.open_gate();
    });

    for result in [first, second] {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("no such binary"));
    }
    assert_eq!(launcher.launches("bad"), 1);
    let info = pool.connection_info("bad").unwrap();
    assert_eq!(info.state, ConnectionState::Failed);
    assert_eq!(info.ref_count, 0);
    assert_eq!(info.waiters, 0);
}

#[tokio::test]
async fn test_servers_connect_independently() {
    let launcher = MockLauncher::new();
    launcher.gate("slow");
    let pool = running_pool(&launcher, PoolSettings::default(), &["slow", "fast"]);

    let mut slow = Box::pin(pool.acquire("slow"));
    assert!(matches!(poll!(&mut slow), Poll::Pending));

    // "slow" is stuck connecting; "fast" is unaffected
    let fast = pool.acquire("fast").await.unwrap();
    assert_eq!(
        pool.connection_info("slow").unwrap().state,
        ConnectionState::Connecting
    );

    launcher.open_gate();
    let slow = slow.await.unwrap();
    fast.release().await.unwrap();
    slow.release().await.unwrap();
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_sole_waiter_abandons_connect() {
    let launcher = MockLauncher::new();
    launcher.gate("fs");
    let pool = running_pool(&launcher, PoolSettings::default(), &["fs"]);

    let mut pending = Box::pin(pool.acquire("fs"));
    assert!(matches!(poll!(&mut pending), Poll::Pending));
    wait_until(|| launcher.launches("fs") == 1).await;

    drop(pending);

    let info = pool.connection_info("fs").unwrap();
    assert_eq!(info.state, ConnectionState::Uninitialized);
    assert_eq!(info.ref_count, 0);
    assert_eq!(info.waiters, 0);

    // The aborted launch never produces a session
    tokio::time::sleep(Duration::from_millis(20)).await;
    launcher.open_gate();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(launcher.sessions("fs").is_empty());

    // The stored permit lets the fresh attempt through
    let session = pool.acquire("fs").await.unwrap();
    assert_eq!(session.generation(), 2);
    assert_eq!(launcher.launches("fs"), 2);
    assert_eq!(pool.connection_info("fs").unwrap().ref_count, 1);
    session.release().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_waiter_leaves_attempt_for_others() {
    let launcher = MockLauncher::new();
    launcher.gate("fs");
    let pool = running_pool(&launcher, PoolSettings::default(), &["fs"]);

    let mut cancelled = Box::pin(pool.acquire("fs"));
    let mut survivor = Box::pin(pool.acquire("fs"));
    assert!(matches!(poll!(&mut cancelled), Poll::Pending));
    assert!(matches!(poll!(&mut survivor), Poll::Pending));
    assert_eq!(pool.connection_info("fs").unwrap().waiters, 2);

    drop(cancelled);
    let info = pool.connection_info("fs").unwrap();
    assert_eq!(info.state, ConnectionState::Connecting);
    assert_eq!(info.waiters, 1);

    launcher.open_gate();
    let session = survivor.await.unwrap();
    assert_eq!(launcher.launches("fs"), 1);
    assert_eq!(pool.connection_info("fs").unwrap().ref_count, 1);
    session.release().await.unwrap();
}

#[tokio::test]
async fn test_cancel_after_connect_completes_leaks_no_reference() {
    let launcher = MockLauncher::new();
    launcher.gate("fs");
    let pool = running_pool(&launcher, PoolSettings::default(), &["fs"]);

    let mut pending = Box::pin(pool.acquire("fs"));
    assert!(matches!(poll!(&mut pending), Poll::Pending));

    launcher.open_gate();
    wait_until(|| pool.connection_info("fs").unwrap().state == ConnectionState::Ready).await;
    // Reserved for the waiter that has not resumed yet
    assert_eq!(pool.connection_info("fs").unwrap().ref_count, 1);

    drop(pending);

    let info = pool.connection_info("fs").unwrap();
    assert_eq!(info.ref_count, 0);
    assert_eq!(info.state, ConnectionState::Ready);
    assert_eq!(launcher.last_session("fs").unwrap().closes(), 0);
}

// ============================================================================
// Request serialization
// ============================================================================

async fn max_concurrent_calls(serialize: bool) -> usize {
    let launcher = MockLauncher::new();
    launcher.session_options(
        "fs",
        SessionOptions {
            call_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        },
    );
    let pool = running_pool(&launcher, PoolSettings::default(), &[]);
    pool.add_server(
        ServerDefinition::stdio("fs", "npx")
            .serialize_requests(serialize)
            .build()
            .unwrap(),
    )
    .unwrap();

    let results = join_all((0..4).map(|i| {
        let pool = pool.clone();
        async move { pool.call_tool("fs", &format!("tool_{}", i), None).await }
    }))
    .await;
    assert!(results.iter().all(Result::is_ok));

    let session = launcher.last_session("fs").unwrap();
    assert_eq!(session.calls(), 4);
    session.max_in_flight()
}

#[tokio::test]
async fn test_serialized_server_never_interleaves_requests() {
    assert_eq!(max_concurrent_calls(true).await, 1);
}

#[tokio::test]
async fn test_unserialized_server_shares_session_concurrently() {
    assert_eq!(max_concurrent_calls(false).await, 4);
}
