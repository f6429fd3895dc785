//! Concurrency tests for SessionRegistry
//!
//! These tests validate that the single registry lock linearizes creation and
//! removal, and that the recycle sweeper behaves under concurrent use:
//! - Racing creations for one user produce exactly one creator
//! - Expired sessions are evicted by the next tick and reported once
//! - Concurrent stops both wait for the loop and its callbacks
//! - Stop returns even when the sweeper's runtime is already gone

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use roster_core::{RegistryConfig, Session, SessionRegistry, SweeperState, session_callback};
use tokio::sync::mpsc;

fn create_test_registry() -> Arc<SessionRegistry<String>> {
    Arc::new(SessionRegistry::with_config(
        RegistryConfig::default().with_inbound_capacity(4),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creations_for_one_user_have_one_winner() {
    let registry = create_test_registry();
    let mut handles = vec![];

    for i in 0..32 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.new_session("same-user", format!("10.0.0.{i}:80")).await
        }));
    }

    let mut winners = 0;
    let mut sessions = vec![];
    for handle in handles {
        let (session, created) = handle.await.unwrap();
        if created {
            winners += 1;
        }
        sessions.push(session);
    }

    assert_eq!(winners, 1);
    assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    assert_eq!(registry.count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation_for_distinct_users_is_safe() {
    let registry = create_test_registry();
    let mut handles = vec![];

    for i in 0..100 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.new_session(format!("user-{i}"), "addr").await
        }));
    }

    let mut sids = vec![];
    for handle in handles {
        let (session, created) = handle.await.unwrap();
        assert!(created);
        sids.push(session.sid().to_string());
    }

    sids.sort();
    sids.dedup();
    assert_eq!(sids.len(), 100);
    assert_eq!(registry.count().await, 100);
    assert_eq!(registry.all_user_ids().await.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_create_and_remove_keep_indices_in_step() {
    let registry = create_test_registry();
    let mut handles = vec![];

    for i in 0..50 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let uid = format!("user-{}", i % 10);
            let (session, _) = registry.new_session(uid.clone(), "addr").await;
            if i % 2 == 0 {
                registry.remove_session(&session).await;
            } else {
                registry.remove_by_uid(&uid).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let sids = registry.all_session_ids().await;
    let uids = registry.all_user_ids().await;
    assert_eq!(sids.len(), uids.len());
    for sid in sids {
        let session = registry.get_by_sid(&sid).await.unwrap();
        let by_uid = registry.get_by_uid(session.uid()).await.unwrap();
        assert!(Arc::ptr_eq(&session, &by_uid));
    }
}

#[tokio::test]
async fn handle_stays_usable_after_removal() {
    let registry = create_test_registry();
    let (session, _) = registry.new_session("u1", "addr").await;

    let handle = registry.get_by_uid("u1").await.unwrap();
    registry.remove_by_uid("u1").await;

    handle.outbound().push("still works".to_string());
    assert_eq!(handle.outbound().pop_all(), vec!["still works"]);
    assert_eq!(handle.sid(), session.sid());
    assert!(registry.get_by_uid("u1").await.is_none());
}

#[tokio::test]
async fn send_after_remove_returns_false() {
    let registry = create_test_registry();
    let (session, _) = registry.new_session("u1", "addr").await;
    let _rx = session.take_inbound().unwrap();

    assert!(session.send_message("before".to_string()).await);
    registry.remove_session(&session).await;

    let sent = tokio::time::timeout(
        Duration::from_secs(1),
        session.send_message("after".to_string()),
    )
    .await
    .expect("send after close must not block");
    assert!(!sent);
}

#[tokio::test]
async fn sweep_tick_evicts_expired_session_once() {
    let registry = create_test_registry();
    let timeout = Duration::from_secs(60);

    let (stale, _) = registry.new_session("stale", "addr").await;
    stale.set_last_activity(Utc::now() - chrono::Duration::seconds(61));
    let (fresh, _) = registry.new_session("fresh", "addr").await;

    let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
    let (checked_tx, mut checked_rx) = mpsc::unbounded_channel();
    let on_expire = session_callback(move |s: Arc<Session<String>>| {
        let tx = expired_tx.clone();
        async move {
            let _ = tx.send(s.uid().to_string());
        }
    });
    let on_check = session_callback(move |s: Arc<Session<String>>| {
        let tx = checked_tx.clone();
        async move {
            let _ = tx.send(s.uid().to_string());
        }
    });

    assert!(registry.start_recycle(
        Duration::from_millis(20),
        timeout,
        Some(on_check),
        Some(on_expire),
    ));

    let expired = tokio::time::timeout(Duration::from_secs(2), expired_rx.recv())
        .await
        .unwrap();
    assert_eq!(expired.as_deref(), Some("stale"));
    let checked = tokio::time::timeout(Duration::from_secs(2), checked_rx.recv())
        .await
        .unwrap();
    assert_eq!(checked.as_deref(), Some("fresh"));

    // Let a few more ticks pass; the stale session must not be reported again
    tokio::time::sleep(Duration::from_millis(100)).await;
    registry.stop_recycle().await;
    assert!(expired_rx.try_recv().is_err());

    assert!(registry.get_by_uid("stale").await.is_none());
    assert!(Arc::ptr_eq(&registry.get_by_uid("fresh").await.unwrap(), &fresh));
    assert!(stale.is_inbound_closed());
}

#[tokio::test]
async fn touched_session_survives_tick() {
    let registry = create_test_registry();
    let (session, _) = registry.new_session("u1", "addr").await;
    session.set_last_activity(Utc::now() - chrono::Duration::seconds(3600));
    session.touch();

    let expired = registry.recycle_now(Duration::from_secs(60), None).await;

    assert!(expired.is_empty());
    assert_eq!(registry.count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_stops_wait_and_no_tick_follows() {
    let registry = create_test_registry();
    registry.new_session("u1", "addr").await;

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    let on_check = session_callback(move |_s: Arc<Session<String>>| {
        let counter = Arc::clone(&counter);
        async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(registry.start_recycle(
        Duration::from_millis(10),
        Duration::from_secs(60),
        Some(on_check),
        None,
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let r1 = Arc::clone(&registry);
    let r2 = Arc::clone(&registry);
    tokio::join!(r1.stop_recycle(), r2.stop_recycle());
    assert_eq!(registry.recycle_state(), SweeperState::Stopped);

    let after_stop = ticks.load(Ordering::SeqCst);
    assert!(after_stop > 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after_stop);

    // A stopped sweeper never restarts
    let on_check = session_callback(|_s: Arc<Session<String>>| async {});
    assert!(!registry.start_recycle(
        Duration::from_millis(10),
        Duration::from_secs(60),
        Some(on_check),
        None,
    ));
    registry.stop_recycle().await;
}

#[tokio::test]
async fn start_without_callbacks_does_nothing() {
    let registry = create_test_registry();

    assert!(!registry.start_recycle(
        Duration::from_millis(10),
        Duration::from_secs(1),
        None,
        None
    ));
    assert_eq!(registry.recycle_state(), SweeperState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_waits_for_slow_callbacks_of_many_sessions() {
    let registry = create_test_registry();
    for i in 0..500 {
        registry.new_session(format!("user-{i}"), "addr").await;
    }

    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    let on_check = session_callback(move |_s: Arc<Session<String>>| {
        let counter = Arc::clone(&counter);
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(registry.start_recycle(
        Duration::from_millis(5),
        Duration::from_secs(60),
        Some(on_check),
        None,
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    registry.stop_recycle().await;

    let at_stop = done.load(Ordering::SeqCst);
    assert!(at_stop >= 500);
    assert_eq!(at_stop % 500, 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(done.load(Ordering::SeqCst), at_stop);
}

#[test]
fn stop_returns_after_sweeper_runtime_shuts_down() {
    let registry = create_test_registry();

    let first = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    first.block_on(async {
        registry.new_session("u1", "addr").await;
        let on_check = session_callback(|_s: Arc<Session<String>>| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert!(registry.start_recycle(
            Duration::from_millis(5),
            Duration::from_secs(60),
            Some(on_check),
            None,
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
    });
    drop(first);

    let second = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let stopped = second.block_on(async {
        tokio::time::timeout(Duration::from_secs(2), registry.stop_recycle())
            .await
            .is_ok()
    });

    assert!(stopped, "stop_recycle must return once the loop task is gone");
    assert_eq!(registry.recycle_state(), SweeperState::Stopped);
}

#[test]
fn stop_returns_when_loop_was_never_polled() {
    let registry = create_test_registry();

    let first = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    first.block_on(async {
        let on_check = session_callback(|_s: Arc<Session<String>>| async {});
        assert!(registry.start_recycle(
            Duration::from_millis(5),
            Duration::from_secs(60),
            Some(on_check),
            None,
        ));
    });
    drop(first);

    let second = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let stopped = second.block_on(async {
        tokio::time::timeout(Duration::from_secs(2), registry.stop_recycle())
            .await
            .is_ok()
    });

    assert!(stopped);
}
