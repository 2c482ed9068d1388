//! Ledger writes and the balance projection that mirrors them.
//!
//! Every credit movement goes through [`LedgerService::post_in`], which applies
//! the delta to `profiles.credits_balance` and appends the ledger row on the
//! same connection. Callers own the transaction, so the pair commits or rolls
//! back together.

use db::models::{
    credits_ledger::{LedgerEntry, NewLedgerEntry},
    profile::Profile,
};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use uuid::Uuid;

pub const MAX_HISTORY: i64 = 200;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("profile not found")]
    ProfileNotFound,
    #[error("insufficient credits")]
    InsufficientCredits,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct BootstrapOutcome {
    pub profile: Profile,
    pub created: bool,
    pub welcome_bonus: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct BalanceDrift {
    pub user_id: Uuid,
    pub previous_balance: i64,
    pub ledger_balance: i64,
}

#[derive(Debug, Clone, Default, Serialize, TS)]
pub struct ReconcileReport {
    pub checked: usize,
    pub repaired: Vec<BalanceDrift>,
}

#[derive(Clone)]
pub struct LedgerService {
    pool: SqlitePool,
    welcome_bonus: i64,
}

impl LedgerService {
    pub fn new(pool: SqlitePool, welcome_bonus: i64) -> Self {
        Self {
            pool,
            welcome_bonus,
        }
    }

    /// Apply `entry` to the balance and append it, on the caller's connection.
    /// Debits are conditional: a debit larger than the balance changes nothing
    /// and fails with `InsufficientCredits`. Returns the entry and the new balance.
    pub async fn post_in(
        conn: &mut SqliteConnection,
        entry: &NewLedgerEntry,
    ) -> Result<(LedgerEntry, i64), LedgerError> {
        let balance = if entry.amount < 0 {
            match Profile::try_debit(&mut *conn, entry.user_id, -entry.amount).await? {
                Some(balance) => balance,
                None if Profile::find_by_id(&mut *conn, entry.user_id).await?.is_some() => {
                    return Err(LedgerError::InsufficientCredits);
                }
                None => return Err(LedgerError::ProfileNotFound),
            }
        } else {
            Profile::apply_delta(&mut *conn, entry.user_id, entry.amount)
                .await?
                .ok_or(LedgerError::ProfileNotFound)?
        };

        let appended = LedgerEntry::append(&mut *conn, entry).await?;
        Ok((appended, balance))
    }

    /// Post a single entry in its own transaction
    pub async fn post(&self, entry: &NewLedgerEntry) -> Result<(LedgerEntry, i64), LedgerError> {
        let mut tx = self.pool.begin().await?;
        let (appended, balance) = Self::post_in(&mut tx, entry).await?;
        tx.commit().await?;

        info!(
            user_id = %entry.user_id,
            amount = entry.amount,
            reason = %entry.reason,
            balance,
            "Ledger entry posted"
        );
        Ok((appended, balance))
    }

    /// Create the caller's profile on first sight and grant the welcome bonus
    /// in the same transaction. Safe to call repeatedly.
    pub async fn bootstrap_account(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
    ) -> Result<BootstrapOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let created = Profile::create_if_missing(&mut *tx, user_id, display_name).await?;
        let welcome_bonus = if created && self.welcome_bonus > 0 {
            Self::post_in(
                &mut tx,
                &NewLedgerEntry::welcome_bonus(user_id, self.welcome_bonus),
            )
            .await?;
            self.welcome_bonus
        } else {
            0
        };
        let profile = Profile::find_by_id(&mut *tx, user_id)
            .await?
            .ok_or(LedgerError::ProfileNotFound)?;
        tx.commit().await?;

        if created {
            info!(user_id = %user_id, welcome_bonus, "Profile bootstrapped");
        }
        Ok(BootstrapOutcome {
            profile,
            created,
            welcome_bonus,
        })
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<i64, LedgerError> {
        Profile::balance(&self.pool, user_id)
            .await?
            .ok_or(LedgerError::ProfileNotFound)
    }

    /// Newest first, at most `MAX_HISTORY` entries
    pub async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<LedgerEntry>, LedgerError> {
        if Profile::find_by_id(&self.pool, user_id).await?.is_none() {
            return Err(LedgerError::ProfileNotFound);
        }
        let limit = limit.clamp(1, MAX_HISTORY);
        Ok(LedgerEntry::find_by_user(&self.pool, user_id, limit).await?)
    }

    /// Rewrite one user's balance from their ledger. Returns the drift that was
    /// repaired, or None when the projection already matched.
    pub async fn reconcile_user(&self, user_id: Uuid) -> Result<Option<BalanceDrift>, LedgerError> {
        let previous_balance = Profile::balance(&self.pool, user_id)
            .await?
            .ok_or(LedgerError::ProfileNotFound)?;

        let mut conn = self.pool.acquire().await?;
        let ledger_balance = Profile::recompute_balance(&mut conn, user_id)
            .await?
            .ok_or(LedgerError::ProfileNotFound)?;

        if previous_balance == ledger_balance {
            return Ok(None);
        }

        let drift = BalanceDrift {
            user_id,
            previous_balance,
            ledger_balance,
        };
        warn!(
            user_id = %user_id,
            previous_balance,
            ledger_balance,
            "Balance drift repaired"
        );
        Ok(Some(drift))
    }

    pub async fn reconcile_all(&self) -> Result<ReconcileReport, LedgerError> {
        let mut report = ReconcileReport::default();
        for user_id in Profile::find_all_ids(&self.pool).await? {
            report.checked += 1;
            match self.reconcile_user(user_id).await {
                Ok(Some(drift)) => report.repaired.push(drift),
                Ok(None) | Err(LedgerError::ProfileNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        info!(
            checked = report.checked,
            repaired = report.repaired.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }
}
