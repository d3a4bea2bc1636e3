//! Scenario: Reconcile Pool Settles Orders
//!
//! # Invariant under test
//! The worker pool drains the reconcile queue until every order it chases
//! reaches a terminal state, and a balance is credited exactly once no
//! matter how often the terminal verdict is delivered. Tasks the authority
//! cannot answer stay queued; tasks for orders the authority has never
//! seen are closed INVALID.
//!
//! Each test spawns the real pool over the in-memory store with short
//! poll intervals and waits for its effects.

use std::time::Duration;

use chrono::Utc;
use mart_db::{BalanceLedger, OrderStore, ReconcileQueue};
use mart_engine::{pool, OrderService, PoolConfig};
use mart_money::Money;
use mart_schemas::{OrderRecord, OrderStatus};
use mart_testkit::{memory_deps, MemoryStore, ScriptedReply};

const OWNER: &str = "alice";
const NUMBER: &str = "12345678903";

fn fast_pool(recheck_delay: Duration) -> PoolConfig {
    PoolConfig {
        workers: 2,
        poll_interval: Duration::from_millis(20),
        claim_batch: 4,
        recheck_delay,
        visibility_timeout: Duration::from_secs(300),
    }
}

/// Poll until the queue is empty, failing the test after two seconds.
async fn drained(store: &MemoryStore) {
    for _ in 0..200 {
        if store.pending_count().await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("reconcile queue did not drain within 2s");
}

/// An account plus one stored order, placed without going through the
/// service.
async fn seed_order(store: &MemoryStore, status: OrderStatus) {
    store.ensure_account(OWNER).await.unwrap();
    store
        .insert_order(&OrderRecord {
            owner: OWNER.to_string(),
            number: NUMBER.to_string(),
            status,
            accrual: Money::ZERO,
            submitted_at: Utc::now(),
        })
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// 1. Full chase: open verdicts until the authority settles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_then_terminal_chase_credits_exactly_once() {
    let (store, accrual, deps) = memory_deps();
    accrual.script(
        NUMBER,
        [
            ScriptedReply::status(NUMBER, OrderStatus::Processing),
            ScriptedReply::status(NUMBER, OrderStatus::Processing),
            ScriptedReply::processed(NUMBER, Money::from_minor(729_98)),
        ],
    );

    // Zero delays so the chase plays out within the test budget.
    let service = OrderService::new(deps.clone(), Duration::ZERO);
    service.submit_order(OWNER, NUMBER).await.unwrap();

    let pool = pool::spawn(deps, fast_pool(Duration::ZERO));
    drained(&store).await;
    pool.shutdown().await;

    let order = store.order(NUMBER).unwrap();
    assert_eq!(order.status, OrderStatus::Processed);
    assert_eq!(order.accrual, Money::from_minor(729_98));
    assert_eq!(store.balance(OWNER).await.unwrap().current, Money::from_minor(729_98));
    assert!(
        accrual.calls(NUMBER) >= 3,
        "the chase must poll until the verdict turns terminal"
    );
}

// ---------------------------------------------------------------------------
// 2. Redelivery cannot double-credit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn redelivered_terminal_verdict_credits_once() {
    let (store, accrual, deps) = memory_deps();
    accrual.script(NUMBER, [ScriptedReply::processed(NUMBER, Money::from_minor(500_00))]);
    seed_order(&store, OrderStatus::New).await;

    // Two deliveries for the same order, racing across two workers.
    store.enqueue(OWNER, NUMBER, Duration::ZERO).await.unwrap();
    store.enqueue(OWNER, NUMBER, Duration::ZERO).await.unwrap();

    let pool = pool::spawn(deps, fast_pool(Duration::ZERO));
    drained(&store).await;
    pool.shutdown().await;

    assert_eq!(store.order(NUMBER).unwrap().status, OrderStatus::Processed);
    assert_eq!(
        store.balance(OWNER).await.unwrap().current,
        Money::from_minor(500_00),
        "duplicate deliveries must credit exactly once"
    );
}

// ---------------------------------------------------------------------------
// 3. Authority has never seen the order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn order_unknown_to_the_authority_is_closed_invalid() {
    let (store, _accrual, deps) = memory_deps();
    seed_order(&store, OrderStatus::New).await;
    store.enqueue(OWNER, NUMBER, Duration::ZERO).await.unwrap();

    let pool = pool::spawn(deps, fast_pool(Duration::ZERO));
    drained(&store).await;
    pool.shutdown().await;

    let order = store.order(NUMBER).unwrap();
    assert_eq!(order.status, OrderStatus::Invalid);
    assert_eq!(order.accrual, Money::ZERO);
    assert_eq!(store.balance(OWNER).await.unwrap().current, Money::ZERO);
}

// ---------------------------------------------------------------------------
// 4. Outage: no verdict, no decision
// ---------------------------------------------------------------------------

#[tokio::test]
async fn outage_leaves_the_task_queued_for_later() {
    let (store, accrual, deps) = memory_deps();
    accrual.script(NUMBER, [ScriptedReply::NoAnswer]);
    seed_order(&store, OrderStatus::New).await;
    store.enqueue(OWNER, NUMBER, Duration::ZERO).await.unwrap();

    // A long recheck delay keeps the postponed task out of reach.
    let pool = pool::spawn(deps, fast_pool(Duration::from_secs(60)));
    for _ in 0..200 {
        if accrual.calls(NUMBER) >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await;

    assert!(accrual.calls(NUMBER) >= 1, "the task was never delivered");
    assert_eq!(
        store.pending_count().await.unwrap(),
        1,
        "an unanswered task must stay queued"
    );
    assert_eq!(
        store.order(NUMBER).unwrap().status,
        OrderStatus::New,
        "no verdict means no state change"
    );
}

// ---------------------------------------------------------------------------
// 5. Stale deliveries against a settled order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_open_reply_does_not_reopen_a_settled_order() {
    let (store, accrual, deps) = memory_deps();
    accrual.script(NUMBER, [ScriptedReply::status(NUMBER, OrderStatus::Processing)]);
    seed_order(&store, OrderStatus::Processed).await;
    store.enqueue(OWNER, NUMBER, Duration::ZERO).await.unwrap();

    let pool = pool::spawn(deps, fast_pool(Duration::ZERO));
    drained(&store).await;
    pool.shutdown().await;

    assert_eq!(
        store.order(NUMBER).unwrap().status,
        OrderStatus::Processed,
        "a stale open reply must not reopen a terminal order"
    );
}

// ---------------------------------------------------------------------------
// 6. Storage failure releases the claim for a later retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn settle_failure_is_retried_on_a_later_delivery() {
    let (store, accrual, deps) = memory_deps();
    accrual.script(NUMBER, [ScriptedReply::processed(NUMBER, Money::from_minor(500_00))]);
    seed_order(&store, OrderStatus::New).await;
    store.enqueue(OWNER, NUMBER, Duration::ZERO).await.unwrap();
    store.fail_next_settles(1);

    let pool = pool::spawn(deps, fast_pool(Duration::ZERO));
    drained(&store).await;
    pool.shutdown().await;

    assert_eq!(store.order(NUMBER).unwrap().status, OrderStatus::Processed);
    assert_eq!(store.balance(OWNER).await.unwrap().current, Money::from_minor(500_00));
    assert!(
        accrual.calls(NUMBER) >= 2,
        "the failed delivery must come back around"
    );
}

// ---------------------------------------------------------------------------
// 7. Shutdown liveness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_returns_once_workers_exit() {
    let (_store, _accrual, deps) = memory_deps();
    let pool = pool::spawn(deps, fast_pool(Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
        .await
        .expect("pool shutdown hung");
}
