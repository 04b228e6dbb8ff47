//! Integration tests for the execution context pool.
//!
//! These tests drive the pool end to end through the stub engine:
//! - Borrowing is bounded by the pool's concurrency
//! - Contexts come back on every exit path
//! - Timeouts and cancellation leave the pool consistent

use acton_plugins::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn pool_with(module: StubModule, concurrency: usize, timeout: Duration) -> ExecutionContextPool {
    let engine = Arc::new(StubEngine::new());
    let bytes = engine.register(module);
    ExecutionContextPool::new(
        PoolOptions::new(engine, bytes)
            .with_concurrency(concurrency)
            .with_timeout(timeout),
    )
    .expect("pool builds")
}

fn answering_module() -> StubModule {
    StubModule::new("answer")
        .with_export("answer", |_env, _args| Ok(vec![Value::I32(42)]))
        .with_export("sleep", |_env, args| {
            let millis = args.first().and_then(Value::as_i32).unwrap_or(0);
            std::thread::sleep(Duration::from_millis(millis as u64));
            Ok(vec![Value::I32(millis)])
        })
        .with_export("fail", |_env, _args| {
            Err(SandboxError::call_failed("fail", "guest refused"))
        })
}

async fn wait_until_settled(pool: &ExecutionContextPool) {
    for _ in 0..100 {
        if pool.metrics().settling == 0 && pool.metrics().available == pool.capacity() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pool did not settle: {:?}", pool.metrics());
}

fn explode() -> Result<i32> {
    panic!("callback exploded")
}

/// Test that a context answers a simple call.
#[tokio::test(flavor = "multi_thread")]
async fn test_call_returns_guest_result() {
    let pool = pool_with(answering_module(), 1, Duration::from_secs(5));

    let values = pool
        .run_with_context(&CancellationToken::new(), |ctx| {
            Box::pin(async move { ctx.call("answer", vec![]).await })
        })
        .await
        .unwrap();

    assert_eq!(values, vec![Value::I32(42)]);
    assert_eq!(pool.metrics().completed, 1);
}

/// Test that the (N+1)-th acquirer waits for a release.
#[tokio::test(flavor = "multi_thread")]
async fn test_acquire_is_bounded_by_concurrency() {
    let pool = pool_with(answering_module(), 2, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let first = pool.acquire(&cancel).await.unwrap();
    let second = pool.acquire(&cancel).await.unwrap();
    assert_eq!(pool.metrics().borrowed, 2);

    let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire(&cancel)).await;
    assert!(blocked.is_err(), "third acquire should wait");

    let waiter = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.acquire(&cancel).await })
    };
    pool.release(first).unwrap();

    let third = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter wakes after release")
        .unwrap()
        .unwrap();

    pool.release(second).unwrap();
    pool.release(third).unwrap();
    assert_eq!(pool.metrics().available, 2);
}

/// Test that concurrent callers never hold more than N contexts.
#[tokio::test(flavor = "multi_thread")]
async fn test_parallel_callers_share_the_pool() {
    let pool = pool_with(answering_module(), 3, Duration::from_secs(5));
    let mut handles = Vec::new();

    for _ in 0..12 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.run_with_context(&CancellationToken::new(), |ctx| {
                Box::pin(async move { ctx.call("sleep", vec![Value::I32(10)]).await })
            })
            .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
        assert!(pool.metrics().borrowed <= 3);
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.completed, 12);
    assert_eq!(metrics.available, 3);
}

/// Test that run_with_context releases after success, error and panic.
#[tokio::test(flavor = "multi_thread")]
async fn test_run_with_context_releases_on_every_path() {
    let pool = pool_with(answering_module(), 1, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    pool.run_with_context(&cancel, |ctx| Box::pin(async move { ctx.call("answer", vec![]).await }))
        .await
        .unwrap();
    assert_eq!(pool.metrics().available, 1);

    let err = pool
        .run_with_context(&cancel, |ctx| Box::pin(async move { ctx.call("fail", vec![]).await }))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Call);
    assert_eq!(pool.metrics().available, 1);

    let err = pool
        .run_with_context(&cancel, |_ctx| Box::pin(async move { explode() }))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Fault);
    assert!(err.to_string().contains("callback exploded"));

    let metrics = pool.metrics();
    assert_eq!(metrics.available, 1);
    assert_eq!(metrics.borrowed, 0);
    assert_eq!(metrics.faults, 1);
}

/// Test that a slow call times out and the pool stays whole afterwards.
#[tokio::test(flavor = "multi_thread")]
async fn test_timeouts_keep_pool_accounting() {
    let pool = pool_with(answering_module(), 2, Duration::from_millis(30));
    let cancel = CancellationToken::new();

    for _ in 0..4 {
        let err = pool
            .run_with_context(&cancel, |ctx| {
                Box::pin(async move { ctx.call("sleep", vec![Value::I32(150)]).await })
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_retriable());
        assert_eq!(pool.metrics().accounted(), 2);
    }

    wait_until_settled(&pool).await;

    let metrics = pool.metrics();
    assert_eq!(metrics.timeouts, 4);
    assert_eq!(metrics.available, 2);

    let values = pool
        .run_with_context(&cancel, |ctx| Box::pin(async move { ctx.call("answer", vec![]).await }))
        .await
        .unwrap();
    assert_eq!(values, vec![Value::I32(42)]);
}

/// Test that a timed-out call gates the next call on the same borrow.
#[tokio::test(flavor = "multi_thread")]
async fn test_next_call_waits_for_abandoned_call() {
    let pool = pool_with(answering_module(), 1, Duration::from_millis(200));
    let mut ctx = pool.acquire(&CancellationToken::new()).await.unwrap();

    let err = ctx.call("sleep", vec![Value::I32(250)]).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(ctx.has_call_in_flight());

    // The abandoned call ends well inside the next call's own timeout.
    let values = ctx.call("answer", vec![]).await.unwrap();
    assert_eq!(values, vec![Value::I32(42)]);
    assert!(!ctx.has_call_in_flight());

    pool.release(ctx).unwrap();
    assert_eq!(pool.metrics().available, 1);
}

/// Test that waiting for an abandoned call is bounded by the next call's timeout.
#[tokio::test(flavor = "multi_thread")]
async fn test_wait_for_abandoned_call_respects_timeout() {
    let pool = pool_with(answering_module(), 1, Duration::from_millis(50));
    let mut ctx = pool.acquire(&CancellationToken::new()).await.unwrap();

    assert!(ctx.call("sleep", vec![Value::I32(600)]).await.unwrap_err().is_timeout());

    let started = std::time::Instant::now();
    let err = ctx.call("answer", vec![]).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed < Duration::from_millis(400), "waited {elapsed:?}");
    assert!(ctx.has_call_in_flight());
    assert_eq!(pool.metrics().timeouts, 2);

    pool.release(ctx).unwrap();
    wait_until_settled(&pool).await;
    assert_eq!(pool.metrics().available, 1);
}

/// Test that a context with a running call is requeued only when it ends.
#[tokio::test(flavor = "multi_thread")]
async fn test_release_defers_requeue_until_call_finishes() {
    let pool = pool_with(answering_module(), 1, Duration::from_millis(20));
    let mut ctx = pool.acquire(&CancellationToken::new()).await.unwrap();

    assert!(ctx.call("sleep", vec![Value::I32(150)]).await.unwrap_err().is_timeout());
    pool.release(ctx).unwrap();

    let metrics = pool.metrics();
    assert_eq!(metrics.available, 0);
    assert_eq!(metrics.settling, 1);

    wait_until_settled(&pool).await;
    assert_eq!(pool.metrics().available, 1);
}

/// Test that cancelling the caller's scope interrupts the wait.
#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_stops_call_and_acquire() {
    let pool = pool_with(answering_module(), 1, Duration::from_secs(5));

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = pool
        .run_with_context(&cancel, |ctx| {
            Box::pin(async move { ctx.call("sleep", vec![Value::I32(100)]).await })
        })
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(pool.metrics().cancellations, 1);

    let held = pool.acquire(&CancellationToken::new()).await.unwrap();
    let already = CancellationToken::new();
    already.cancel();
    assert!(pool.acquire(&already).await.unwrap_err().is_cancelled());

    pool.release(held).unwrap();
    wait_until_settled(&pool).await;
}

/// Test that a closed pool refuses new borrows and disposes returns.
#[tokio::test(flavor = "multi_thread")]
async fn test_close_rejects_acquirers() {
    let pool = pool_with(answering_module(), 2, Duration::from_secs(5));
    let held = pool.acquire(&CancellationToken::new()).await.unwrap();

    pool.close();
    pool.close();
    assert!(pool.is_closed());

    let err = pool.acquire(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_shutting_down());

    pool.release(held).unwrap();
    assert_eq!(pool.metrics().available, 0);
}

/// Test that a context cannot be released into another pool.
#[tokio::test(flavor = "multi_thread")]
async fn test_release_into_foreign_pool_is_rejected() {
    let first = pool_with(answering_module(), 1, Duration::from_secs(5));
    let second = pool_with(answering_module(), 1, Duration::from_secs(5));

    let ctx = first.acquire(&CancellationToken::new()).await.unwrap();
    assert!(second.release(ctx).is_err());
}

/// Test that a missing export is reported as not implemented.
#[tokio::test(flavor = "multi_thread")]
async fn test_missing_export_is_not_implemented() {
    let pool = pool_with(answering_module(), 1, Duration::from_secs(5));

    let err = pool
        .run_with_context(&CancellationToken::new(), |ctx| {
            Box::pin(async move { ctx.call("nope", vec![]).await })
        })
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotImplemented);
}

/// Test that construction fails as a whole on an unresolved import.
#[tokio::test(flavor = "multi_thread")]
async fn test_unresolved_import_aborts_construction() {
    let engine = Arc::new(StubEngine::new());
    let bytes = engine.register(StubModule::new("needs-store").with_import("store", "takeToken"));

    let err = ExecutionContextPool::new(PoolOptions::new(engine, bytes)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Construction);
}

/// Test that construction fails when the memory export is missing.
#[tokio::test(flavor = "multi_thread")]
async fn test_missing_memory_aborts_construction() {
    let engine = Arc::new(StubEngine::new());
    let bytes = engine.register(StubModule::new("no-memory").without_memory());

    let err = ExecutionContextPool::new(PoolOptions::new(engine, bytes)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Construction);
}

/// Test that two capabilities defining the same function abort construction.
#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_capability_aborts_construction() {
    let engine = Arc::new(StubEngine::new());
    let bytes = engine.register(StubModule::new("dup"));

    let options = PoolOptions::new(engine, bytes)
        .with_capability(Capability::Interop)
        .with_capability(Capability::Interop);
    let err = ExecutionContextPool::new(options).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Construction);
}
