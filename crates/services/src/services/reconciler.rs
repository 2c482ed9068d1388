//! Background sweep that re-materialises every balance from the ledger.

use std::time::Duration;

use tokio::{task::JoinHandle, time::interval};
use tracing::{error, info};

use super::ledger::{LedgerError, LedgerService, ReconcileReport};

pub struct BalanceReconciler {
    ledger: LedgerService,
    poll_interval: Duration,
}

impl BalanceReconciler {
    pub fn new(ledger: LedgerService, poll_interval: Duration) -> Self {
        Self {
            ledger,
            poll_interval,
        }
    }

    /// Spawn the sweep loop. Returns None when the interval is zero (disabled).
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if self.poll_interval.is_zero() {
            info!("Balance reconciliation sweep disabled");
            return None;
        }
        Some(tokio::spawn(async move { self.start().await }))
    }

    async fn start(&self) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Starting balance reconciliation sweep"
        );
        let mut interval = interval(self.poll_interval);
        // The first tick fires immediately; skip it so startup is not slowed by a full sweep
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                error!(error = %e, "Balance reconciliation sweep failed");
            }
        }
    }

    pub async fn sweep(&self) -> Result<ReconcileReport, LedgerError> {
        self.ledger.reconcile_all().await
    }
}

#[cfg(test)]
mod tests {
    use db::DBService;

    use super::*;
    use crate::services::test_support::user_with_balance;

    #[tokio::test]
    async fn test_zero_interval_disables_sweep() {
        let db = DBService::new_in_memory().await.unwrap();
        let reconciler =
            BalanceReconciler::new(LedgerService::new(db.pool.clone(), 100), Duration::ZERO);
        assert!(reconciler.spawn().is_none());
    }

    #[tokio::test]
    async fn test_sweep_repairs_drift() {
        let db = DBService::new_in_memory().await.unwrap();
        let user = user_with_balance(&db.pool, 50).await;
        sqlx::query("UPDATE profiles SET credits_balance = 0 WHERE id = $1")
            .bind(user)
            .execute(&db.pool)
            .await
            .unwrap();

        let ledger = LedgerService::new(db.pool.clone(), 100);
        let report = BalanceReconciler::new(ledger.clone(), Duration::from_secs(60))
            .sweep()
            .await
            .unwrap();
        assert_eq!(report.repaired.len(), 1);
        assert_eq!(ledger.balance(user).await.unwrap(), 50);
    }
}
