//! Reconciliation worker.
//!
//! Walks `PendingSync` transactions and asks a [`SettlementOracle`] whether
//! the network has settled them. Confirmed and failed verdicts are applied
//! through the [`FundLockManager`]; pending ones are left for the next pass.
//! `Locked` rows are never touched here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::manager::FundLockManager;
use crate::types::{Transaction, TransactionStatus};

/// Shortest period [`Reconciler::spawn`] will poll at.
pub const MIN_RECONCILE_PERIOD: Duration = Duration::from_millis(100);

/// Network view of a handed-off transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementVerdict {
    Confirmed,
    Failed,
    Pending,
}

/// Source of settlement verdicts (chain RPC, indexer, ...).
#[async_trait]
pub trait SettlementOracle: Send + Sync {
    async fn verdict(&self, tx: &Transaction) -> SettlementVerdict;
}

/// Treats every handed-off transaction as settled.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssumeConfirmed;

#[async_trait]
impl SettlementOracle for AssumeConfirmed {
    async fn verdict(&self, _tx: &Transaction) -> SettlementVerdict {
        SettlementVerdict::Confirmed
    }
}

/// Counts from one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub pending: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    manager: FundLockManager,
    oracle: Arc<dyn SettlementOracle>,
}

impl Reconciler {
    pub fn new(manager: FundLockManager, oracle: Arc<dyn SettlementOracle>) -> Self {
        Self { manager, oracle }
    }

    /// One pass over every `PendingSync` transaction.
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let pending = match self
            .manager
            .transactions_with_status(TransactionStatus::PendingSync)
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "Failed to list pending transactions");
                report.errors += 1;
                return report;
            }
        };

        for tx in pending {
            report.examined += 1;
            let target = match self.oracle.verdict(&tx).await {
                SettlementVerdict::Confirmed => TransactionStatus::Confirmed,
                SettlementVerdict::Failed => TransactionStatus::Failed,
                SettlementVerdict::Pending => {
                    report.pending += 1;
                    continue;
                }
            };

            match self.manager.settle(&tx.id, target) {
                Ok(_) if target == TransactionStatus::Confirmed => report.confirmed += 1,
                Ok(_) => report.failed += 1,
                Err(err) => {
                    tracing::warn!(tx_id = %tx.id, error = %err, "Reconciliation settle failed");
                    report.errors += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                confirmed = report.confirmed,
                failed = report.failed,
                pending = report.pending,
                "Reconciliation pass complete"
            );
        }
        report
    }

    /// Run [`Reconciler::run_once`] every `period` until stopped.
    ///
    /// Periods below [`MIN_RECONCILE_PERIOD`] are raised to it.
    pub fn spawn(self, period: Duration) -> ReconcilerHandle {
        if period < MIN_RECONCILE_PERIOD {
            tracing::warn!(
                requested_ms = period.as_millis() as u64,
                "Reconcile period too short, using minimum"
            );
        }
        let period = period.max(MIN_RECONCILE_PERIOD);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period_ms = period.as_millis() as u64, "Reconciler started");
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            tracing::info!("Reconciler stopped");
        });
        ReconcilerHandle { stop_tx, task }
    }
}

pub struct ReconcilerHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop after the current pass and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::types::TransactionId;

    struct ScriptedOracle {
        verdicts: Mutex<HashMap<TransactionId, SettlementVerdict>>,
    }

    #[async_trait]
    impl SettlementOracle for ScriptedOracle {
        async fn verdict(&self, tx: &Transaction) -> SettlementVerdict {
            self.verdicts
                .lock()
                .unwrap()
                .get(&tx.id)
                .copied()
                .unwrap_or(SettlementVerdict::Pending)
        }
    }

    fn handed_off(manager: &FundLockManager, amount: u64) -> TransactionId {
        let id = manager.lock_funds(amount).unwrap();
        manager
            .mark_pending_sync(&id, Some("peer".into()), None)
            .unwrap();
        id
    }

    #[tokio::test]
    async fn applies_verdicts_and_leaves_locked_rows_alone() {
        let manager = FundLockManager::in_memory();
        manager.seed_balance(100).unwrap();

        let confirmed = handed_off(&manager, 10);
        let failed = handed_off(&manager, 20);
        let waiting = handed_off(&manager, 30);
        let locked = manager.lock_funds(5).unwrap();

        let oracle = ScriptedOracle {
            verdicts: Mutex::new(HashMap::from([
                (confirmed.clone(), SettlementVerdict::Confirmed),
                (failed.clone(), SettlementVerdict::Failed),
            ])),
        };
        let reconciler = Reconciler::new(manager.clone(), Arc::new(oracle));
        let report = reconciler.run_once().await;

        assert_eq!(
            report,
            ReconcileReport {
                examined: 3,
                confirmed: 1,
                failed: 1,
                pending: 1,
                errors: 0
            }
        );
        let status = |id: &TransactionId| manager.transaction(id).unwrap().unwrap().status;
        assert_eq!(status(&confirmed), TransactionStatus::Confirmed);
        assert_eq!(status(&failed), TransactionStatus::Failed);
        assert_eq!(status(&waiting), TransactionStatus::PendingSync);
        assert_eq!(status(&locked), TransactionStatus::Locked);
        assert_eq!(manager.available().unwrap(), 100 - 10 - 30 - 5);
        manager.snapshot().unwrap().verify().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_worker_settles_until_stopped() {
        let manager = FundLockManager::in_memory();
        manager.seed_balance(50).unwrap();
        let id = handed_off(&manager, 15);

        let handle =
            Reconciler::new(manager.clone(), Arc::new(AssumeConfirmed)).spawn(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop().await;

        assert_eq!(
            manager.transaction(&id).unwrap().unwrap().status,
            TransactionStatus::Confirmed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_raised_to_the_minimum() {
        let manager = FundLockManager::in_memory();
        manager.seed_balance(20).unwrap();
        let first = handed_off(&manager, 5);

        let handle = Reconciler::new(manager.clone(), Arc::new(AssumeConfirmed)).spawn(Duration::ZERO);
        tokio::time::sleep(MIN_RECONCILE_PERIOD / 2).await;
        let second = handed_off(&manager, 5);
        tokio::time::sleep(MIN_RECONCILE_PERIOD).await;
        handle.stop().await;

        let status = |id: &TransactionId| manager.transaction(id).unwrap().unwrap().status;
        assert_eq!(status(&first), TransactionStatus::Confirmed);
        assert_eq!(status(&second), TransactionStatus::Confirmed);
    }
}
