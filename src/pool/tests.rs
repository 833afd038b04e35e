use super::*;
use crate::browser::MockFactory;
use std::sync::atomic::{AtomicUsize, Ordering};

fn config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min,
        max,
        acquire_timeout: None,
        max_waiting_clients: 16,
        eager: true,
        validate_on_borrow: false,
    }
}

fn pool_with(factory: &MockFactory, config: PoolConfig) -> RendererPool {
    RendererPool::new(config, Arc::new(factory.clone()))
}

async fn wait_for(pool: &RendererPool, cond: impl Fn(&PoolStats) -> bool) {
    for _ in 0..1_000 {
        if cond(&pool.stats()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("pool never reached expected state: {:?}", pool.stats());
}

#[tokio::test]
async fn eager_init_warms_min_and_is_idempotent() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(2, 4));

    pool.init().await.expect("init should succeed");
    pool.init().await.expect("second init is a no-op");

    let stats = pool.stats();
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.leased, 0);
    assert_eq!(factory.stats().launches(), 2);
}

#[tokio::test]
async fn init_failure_is_reported_as_create_failed() {
    let factory = MockFactory::new().failing_launch("no chrome binary");
    let pool = pool_with(&factory, config(1, 2));

    let err = pool.init().await.unwrap_err();
    match err {
        PrintdError::CreateFailed(msg) => assert!(msg.contains("no chrome binary")),
        other => panic!("expected CreateFailed, got {other:?}"),
    }
    assert_eq!(pool.stats().pending, 0);
}

#[tokio::test]
async fn zero_min_starts_nothing_until_demand() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(0, 2));

    pool.init().await.unwrap();
    assert_eq!(factory.stats().launches(), 0);

    let lease = pool.acquire().await.unwrap();
    assert_eq!(factory.stats().launches(), 1);
    pool.release(lease);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn lazy_pool_skips_warm_up() {
    let factory = MockFactory::new();
    let pool = pool_with(
        &factory,
        PoolConfig {
            eager: false,
            ..config(2, 2)
        },
    );
    pool.init().await.unwrap();
    assert_eq!(factory.stats().launches(), 0);
}

#[tokio::test]
async fn released_process_is_reused() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(0, 2));

    let first = pool.acquire().await.unwrap();
    let first_id = first.id();
    pool.release(first);

    let second = pool.acquire().await.unwrap();
    assert_eq!(second.id(), first_id);
    assert_eq!(factory.stats().launches(), 1);
    pool.release(second);
}

#[tokio::test(start_paused = true)]
async fn leased_count_never_exceeds_max() {
    let factory = MockFactory::new().with_launch_delay(Duration::from_millis(5));
    let pool = pool_with(&factory, config(0, 2));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            let lease = pool.acquire().await.unwrap();
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            assert!(pool.stats().leased <= 2);
            tokio::time::sleep(Duration::from_millis(10)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            pool.release(lease);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(factory.stats().launches(), 2);
    let stats = pool.stats();
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn queued_requests_are_served_in_arrival_order() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(0, 1));
    let held = pool.acquire().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for name in ["first", "second", "third"] {
        let pool_clone = pool.clone();
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let lease = pool_clone.acquire().await.unwrap();
            order.lock().unwrap().push(name);
            tokio::time::sleep(Duration::from_millis(1)).await;
            pool_clone.release(lease);
        }));
        let queued = handles.len();
        wait_for(&pool, |s| s.waiting == queued).await;
    }

    pool.release(held);
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    assert_eq!(factory.stats().launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn full_queue_fails_immediately() {
    let factory = MockFactory::new();
    let pool = pool_with(
        &factory,
        PoolConfig {
            max_waiting_clients: 1,
            ..config(0, 1)
        },
    );
    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|lease| pool.release(lease)) })
    };
    wait_for(&pool, |s| s.waiting == 1).await;

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PrintdError::PoolExhausted { waiting: 1 }));

    pool.release(held);
    waiter.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn timed_out_waiter_leaves_queue_without_disturbing_others() {
    let factory = MockFactory::new();
    let pool = pool_with(
        &factory,
        PoolConfig {
            acquire_timeout: Some(Duration::from_millis(100)),
            ..config(0, 1)
        },
    );
    let held = pool.acquire().await.unwrap();

    let early = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|lease| lease.id()) })
    };
    wait_for(&pool, |s| s.waiting == 1).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    let late = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let lease = pool.acquire().await?;
            let id = lease.id();
            pool.release(lease);
            Ok::<_, PrintdError>(id)
        })
    };
    wait_for(&pool, |s| s.waiting == 2).await;

    let early = early.await.unwrap();
    assert!(matches!(early, Err(PrintdError::AcquireTimeout(_))));
    assert_eq!(pool.stats().waiting, 1);

    let held_id = held.id();
    pool.release(held);
    assert_eq!(late.await.unwrap().unwrap(), held_id);
    assert_eq!(pool.stats().waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_waiter_is_removed_from_queue() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(0, 1));
    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|lease| pool.release(lease)) })
    };
    wait_for(&pool, |s| s.waiting == 1).await;
    waiter.abort();
    let _ = waiter.await;
    assert_eq!(pool.stats().waiting, 0);

    pool.release(held);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn dropped_lease_returns_process() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(0, 1));

    {
        let _lease = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().leased, 1);
    }

    let stats = pool.stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, 1);
}

#[tokio::test(start_paused = true)]
async fn destroy_launches_replacement_for_waiter() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(0, 1));
    let broken = pool.acquire().await.unwrap();
    let broken_id = broken.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let lease = pool.acquire().await?;
            let id = lease.id();
            pool.release(lease);
            Ok::<_, PrintdError>(id)
        })
    };
    wait_for(&pool, |s| s.waiting == 1).await;

    pool.destroy(broken).await;
    let replacement = waiter.await.unwrap().unwrap();

    assert_ne!(replacement, broken_id);
    assert_eq!(factory.stats().launches(), 2);
    assert_eq!(factory.stats().shutdowns(), 1);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_destroy_still_serves_waiter() {
    let factory = MockFactory::new().with_shutdown_delay(Duration::from_secs(1));
    let pool = pool_with(&factory, config(0, 1));
    let broken = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let lease = pool.acquire().await?;
            pool.release(lease);
            Ok::<_, PrintdError>(())
        })
    };
    wait_for(&pool, |s| s.waiting == 1).await;

    let cancelled = tokio::time::timeout(Duration::from_millis(10), pool.destroy(broken)).await;
    assert!(cancelled.is_err(), "destroy should still be shutting down");

    tokio::time::timeout(Duration::from_secs(60), waiter)
        .await
        .expect("waiter must be served by the freed capacity")
        .unwrap()
        .unwrap();

    wait_for(&pool, |s| s.waiting == 0 && s.leased == 0 && s.idle == 1).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(factory.stats().shutdowns(), 1);
    assert_eq!(factory.stats().launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn destroy_tops_eager_pool_back_up_to_min() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(1, 2));
    pool.init().await.unwrap();

    let lease = pool.acquire().await.unwrap();
    pool.destroy(lease).await;
    wait_for(&pool, |s| s.idle == 1 && s.pending == 0).await;

    assert_eq!(factory.stats().launches(), 2);
}

#[tokio::test]
async fn launch_failure_only_fails_its_own_request() {
    let factory = MockFactory::new().failing_launch_after(1, "chromium crashed on start");
    let pool = pool_with(&factory, config(0, 2));

    let healthy = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PrintdError::CreateFailed(_)));

    let stats = pool.stats();
    assert_eq!(stats.leased, 1);
    assert_eq!(stats.pending, 0);
    pool.release(healthy);
}

#[tokio::test(start_paused = true)]
async fn queued_launch_failure_fails_oldest_waiter() {
    let factory = MockFactory::new().failing_launch_after(1, "out of memory");
    let pool = pool_with(&factory, config(0, 1));
    let broken = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|lease| pool.release(lease)) })
    };
    wait_for(&pool, |s| s.waiting == 1).await;

    pool.destroy(broken).await;
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PrintdError::CreateFailed(msg) if msg == "out of memory"));
    assert_eq!(pool.stats().pending, 0);
}

#[tokio::test(start_paused = true)]
async fn validate_on_borrow_discards_dead_idle_process() {
    let factory = MockFactory::new();
    let pool = pool_with(
        &factory,
        PoolConfig {
            validate_on_borrow: true,
            ..config(0, 1)
        },
    );
    let lease = pool.acquire().await.unwrap();
    let dead_id = lease.id();
    pool.release(lease);

    factory.stats().disconnect_all();
    let lease = pool.acquire().await.unwrap();
    assert_ne!(lease.id(), dead_id);
    assert_eq!(factory.stats().launches(), 2);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(factory.stats().shutdowns(), 1);
    pool.release(lease);
}

#[tokio::test(start_paused = true)]
async fn drain_rejects_queue_and_waits_for_leases() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(0, 1));
    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|lease| pool.release(lease)) })
    };
    wait_for(&pool, |s| s.waiting == 1).await;

    let drain = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.drain(None).await })
    };
    wait_for(&pool, |s| s.draining).await;

    assert!(matches!(waiter.await.unwrap(), Err(PrintdError::PoolClosed)));
    assert!(matches!(pool.acquire().await, Err(PrintdError::PoolClosed)));
    assert!(!pool.is_accepting());
    assert!(!drain.is_finished());

    pool.release(held);
    drain.await.unwrap();

    let stats = pool.stats();
    assert!(stats.closed);
    assert_eq!(stats.idle, 0);
    assert_eq!(factory.stats().launches(), 1);
    assert_eq!(factory.stats().shutdowns(), 1);
    assert!(matches!(pool.init().await, Err(PrintdError::PoolClosed)));
}

#[tokio::test(start_paused = true)]
async fn drain_grace_forces_outstanding_leases_closed() {
    let factory = MockFactory::new();
    let pool = pool_with(&factory, config(0, 2));
    let stuck = pool.acquire().await.unwrap();

    pool.drain(Some(Duration::from_millis(50))).await;
    assert!(pool.stats().closed);
    assert_eq!(factory.stats().shutdowns(), 1);

    // The late release refers to a process the pool no longer tracks.
    pool.release(stuck);
    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.leased, 0);
    assert_eq!(factory.stats().shutdowns(), 1);
}
