//! Tests for the process slot pool.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use claude_cli_provider::provider::{AcquireError, SlotPool};
use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready_ok};
use tokio_util::sync::CancellationToken;

fn bounded(n: usize) -> SlotPool {
    SlotPool::bounded(NonZeroUsize::new(n).unwrap())
}

#[tokio::test]
async fn acquire_up_to_capacity() {
    let pool = bounded(2);
    let token = CancellationToken::new();

    let a = assert_ok!(pool.acquire(&token).await);
    let b = assert_ok!(pool.acquire(&token).await);
    assert_eq!(pool.in_use(), 2);
    assert!(pool.try_acquire().is_none());

    drop(a);
    assert_eq!(pool.in_use(), 1);
    assert!(pool.try_acquire().is_some());
    drop(b);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.high_water_mark(), 2);
}

#[tokio::test]
async fn unbounded_pool_never_blocks() {
    let pool = SlotPool::unbounded();
    let token = CancellationToken::new();

    let mut slots = Vec::new();
    for _ in 0..50 {
        slots.push(pool.acquire(&token).await.unwrap());
    }
    assert_eq!(pool.in_use(), 50);
    assert_eq!(pool.capacity(), None);
    slots.clear();
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn cancelled_token_fails_fast() {
    let pool = bounded(1);
    let token = CancellationToken::new();
    token.cancel();

    assert_eq!(assert_err!(pool.acquire(&token).await), AcquireError::Cancelled);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn acquire_waits_for_release() {
    let pool = bounded(1);
    let token = CancellationToken::new();
    let held = assert_ok!(pool.acquire(&token).await);

    let mut waiter = tokio_test::task::spawn(pool.acquire(&token));
    assert_pending!(waiter.poll());
    assert_eq!(pool.waiting(), 1);

    drop(held);
    assert!(waiter.is_woken());
    let slot = assert_ready_ok!(waiter.poll());
    assert_eq!(pool.in_use(), 1);
    assert_eq!(pool.waiting(), 0);
    drop(slot);
}

#[tokio::test]
async fn cancel_while_queued_leaves_queue() {
    let pool = Arc::new(bounded(1));
    let held = pool.acquire(&CancellationToken::new()).await.unwrap();

    let token = CancellationToken::new();
    let waiter = {
        let pool = Arc::clone(&pool);
        let token = token.clone();
        tokio::spawn(async move { pool.acquire(&token).await.map(drop) })
    };

    while pool.waiting() == 0 {
        tokio::task::yield_now().await;
    }
    token.cancel();

    assert_eq!(waiter.await.unwrap(), Err(AcquireError::Cancelled));
    assert_eq!(pool.waiting(), 0);
    assert_eq!(pool.in_use(), 1);

    drop(held);
    assert_eq!(pool.available(), Some(1));
}

#[tokio::test]
async fn close_rejects_waiters_and_new_requests() {
    let pool = Arc::new(bounded(1));
    let held = pool.acquire(&CancellationToken::new()).await.unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire(&CancellationToken::new()).await.map(drop) })
    };
    while pool.waiting() == 0 {
        tokio::task::yield_now().await;
    }

    pool.close();
    assert_eq!(waiter.await.unwrap(), Err(AcquireError::Closed));
    assert!(pool.try_acquire().is_none());
    assert_eq!(
        pool.acquire(&CancellationToken::new()).await.unwrap_err(),
        AcquireError::Closed
    );

    pool.release(held);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn waiters_are_served_in_arrival_order() {
    let pool = Arc::new(bounded(1));
    let held = pool.acquire(&CancellationToken::new()).await.unwrap();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for i in 0..4 {
        let waiter = Arc::clone(&pool);
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let slot = waiter.acquire(&CancellationToken::new()).await.unwrap();
            order.lock().unwrap().push(i);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(slot);
        }));
        while pool.waiting() < i + 1 {
            tokio::task::yield_now().await;
        }
    }

    drop(held);
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capacity_is_never_exceeded() {
    for capacity in [1, 2, 3, 5] {
        let pool = Arc::new(bounded(capacity));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let pool = Arc::clone(&pool);
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let slot = pool.acquire(&CancellationToken::new()).await.unwrap();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1 + (i % 3))).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    drop(slot);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= capacity);
        assert!(pool.high_water_mark() <= capacity);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), Some(capacity));
    }
}

#[tokio::test]
async fn dropped_acquire_future_leaves_queue() {
    let pool = bounded(1);
    let _held = pool.acquire(&CancellationToken::new()).await.unwrap();

    let token = CancellationToken::new();
    let result = tokio::time::timeout(Duration::from_millis(20), pool.acquire(&token)).await;

    assert!(result.is_err());
    assert_eq!(pool.waiting(), 0);
}
