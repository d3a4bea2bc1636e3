//! Reconciliation worker pool.
//!
//! N workers drain the reconcile queue concurrently. Each delivery is one
//! authority poll followed by exactly one queue verdict:
//!
//! - terminal reply: settle the order (credit rides the same transaction),
//!   then ack. Redelivery after a crash is harmless because settling is a
//!   compare-and-set.
//! - open reply: refresh the stored status and postpone the task by the
//!   recheck delay, atomically keeping the chase alive.
//! - authority has no such order: settle INVALID and ack; the chase is over.
//! - no usable answer: postpone and try again later.
//! - storage failure: release the claim so another worker retries soon.
//!
//! A reaper task sweeps claims held longer than the visibility timeout, so
//! a worker dying mid-task costs one redelivery, never the task.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mart_accrual::AccrualError;
use mart_money::Money;
use mart_schemas::{OrderStatus, ReconcileTask};

use crate::EngineDeps;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing and timing for [`spawn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Concurrent workers draining the queue.
    pub workers: usize,
    /// Idle pause between empty polls.
    pub poll_interval: Duration,
    /// Tasks a worker claims per poll.
    pub claim_batch: i64,
    /// Rest before an open order is checked against the authority again.
    pub recheck_delay: Duration,
    /// Claims older than this are treated as abandoned by a dead worker.
    pub visibility_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            poll_interval: Duration::from_secs(1),
            claim_batch: 4,
            recheck_delay: Duration::from_secs(300),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool lifecycle
// ---------------------------------------------------------------------------

/// Handle to a running pool. Dropping it does not stop the workers; call
/// [`PoolHandle::shutdown`].
pub struct PoolHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PoolHandle {
    /// Ask every worker to stop after its in-flight batch and wait for all
    /// of them to exit.
    pub async fn shutdown(self) {
        // Send fails only when every worker already exited.
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "worker task join failed");
            }
        }
        info!("reconcile pool stopped");
    }
}

/// Start `config.workers` workers plus the claim reaper.
pub fn spawn(deps: EngineDeps, config: PoolConfig) -> PoolHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool_id = Uuid::new_v4();
    let mut tasks = Vec::with_capacity(config.workers + 1);

    for idx in 0..config.workers {
        let worker = Worker {
            deps: deps.clone(),
            config,
            consumer: format!("{pool_id}/{idx}"),
        };
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            worker.run(&mut shutdown).await;
        }));
    }

    let mut shutdown = shutdown_rx;
    tasks.push(tokio::spawn(async move {
        reaper(deps, config, &mut shutdown).await;
    }));

    info!(workers = config.workers, %pool_id, "reconcile pool started");
    PoolHandle {
        shutdown: shutdown_tx,
        tasks,
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    deps: EngineDeps,
    config: PoolConfig,
    consumer: String,
}

impl Worker {
    async fn run(&self, shutdown: &mut watch::Receiver<bool>) {
        debug!(consumer = %self.consumer, "worker started");
        loop {
            if *shutdown.borrow() {
                debug!(consumer = %self.consumer, "worker stopped");
                return;
            }

            let batch = match self
                .deps
                .queue
                .claim(&self.consumer, self.config.claim_batch)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(consumer = %self.consumer, error = %err, "queue claim failed");
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for task in &batch {
                self.reconcile(task).await;
            }
        }
    }

    /// One delivery. Every exit acks, postpones, or releases the task.
    async fn reconcile(&self, task: &ReconcileTask) {
        match self.deps.accrual.fetch(&task.number).await {
            Ok(reply) if reply.status.is_terminal() => {
                let accrual = match (reply.status, reply.accrual) {
                    (OrderStatus::Processed, Some(amount)) => amount,
                    _ => Money::ZERO,
                };
                match self
                    .deps
                    .orders
                    .settle_order(&task.number, reply.status, accrual)
                    .await
                {
                    Ok(outcome) => {
                        debug!(
                            number = %task.number,
                            status = reply.status.as_str(),
                            ?outcome,
                            "order settled"
                        );
                        self.ack(task).await;
                    }
                    Err(err) => {
                        warn!(number = %task.number, error = %err, "settle failed");
                        self.release(task).await;
                    }
                }
            }
            Ok(reply) => {
                // Still open. Record what the authority said and look again
                // after the recheck delay.
                match self
                    .deps
                    .orders
                    .refresh_status(&task.number, reply.status)
                    .await
                {
                    Ok(true) => self.postpone(task).await,
                    Ok(false) => {
                        // The record is already terminal; a stale open reply
                        // does not reopen it.
                        self.ack(task).await;
                    }
                    Err(err) => {
                        warn!(number = %task.number, error = %err, "status refresh failed");
                        self.release(task).await;
                    }
                }
            }
            Err(AccrualError::NotFound(_)) => {
                // The authority will never produce a verdict for an order it
                // cannot see; close the chase as INVALID.
                match self
                    .deps
                    .orders
                    .settle_order(&task.number, OrderStatus::Invalid, Money::ZERO)
                    .await
                {
                    Ok(_) => self.ack(task).await,
                    Err(err) => {
                        warn!(number = %task.number, error = %err, "invalidation failed");
                        self.release(task).await;
                    }
                }
            }
            Err(err) => {
                debug!(number = %task.number, error = %err, "no usable answer; postponing");
                self.postpone(task).await;
            }
        }
    }

    async fn ack(&self, task: &ReconcileTask) {
        if let Err(err) = self.deps.queue.ack(task.task_id).await {
            warn!(number = %task.number, error = %err, "ack failed");
        }
    }

    async fn postpone(&self, task: &ReconcileTask) {
        if let Err(err) = self
            .deps
            .queue
            .postpone(task.task_id, self.config.recheck_delay)
            .await
        {
            // The claim stays put; the reaper hands it back eventually.
            warn!(number = %task.number, error = %err, "postpone failed");
        }
    }

    async fn release(&self, task: &ReconcileTask) {
        if let Err(err) = self.deps.queue.release(task.task_id).await {
            warn!(number = %task.number, error = %err, "release failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Claim reaper
// ---------------------------------------------------------------------------

/// Return claims abandoned by dead workers to the queue.
async fn reaper(deps: EngineDeps, config: PoolConfig, shutdown: &mut watch::Receiver<bool>) {
    let Ok(visibility) = chrono::Duration::from_std(config.visibility_timeout) else {
        error!("visibility timeout out of range; claim reaper disabled");
        return;
    };
    // Sweeping at half the timeout bounds an abandoned claim's wait to
    // one and a half timeouts.
    let interval = (config.visibility_timeout / 2).max(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            return;
        }

        match deps.queue.release_expired(Utc::now() - visibility).await {
            Ok(0) => {}
            Ok(released) => info!(released, "returned abandoned claims to the queue"),
            Err(err) => warn!(error = %err, "expired claim sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_matches_the_deployment_shape() {
        let config = PoolConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.recheck_delay, Duration::from_secs(300));
        assert_eq!(config.visibility_timeout, Duration::from_secs(300));
        assert!(config.claim_batch >= 1);
    }
}
