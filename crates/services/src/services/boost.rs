//! Boost purchases and cancellations.
//!
//! A purchase is one transaction whose first statement is the conditional
//! debit of the buyer's balance. That write takes SQLite's write lock, so
//! concurrent purchases by the same buyer queue behind each other and each one
//! sees the balance the previous one left behind.

use chrono::{DateTime, Duration, Utc};
use db::models::{
    boost_product::BoostProduct,
    boost_purchase::{BoostPurchase, BoostPurchaseWithStatus, CreateBoostPurchase, PromotionStatus},
    credits_ledger::NewLedgerEntry,
    form::{Form, FormStatus},
    profile::Profile,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::ledger::{LedgerError, LedgerService};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("sign in to purchase a boost")]
    Unauthenticated,
    #[error("form not found")]
    FormNotFound,
    #[error("only the form owner can boost this form")]
    NotOwner,
    #[error("form must be published before it can be boosted")]
    FormNotPublished,
    #[error("boost product not found")]
    ProductNotFound,
    #[error("boost product is not available")]
    ProductInactive,
    #[error("profile not found")]
    ProfileNotFound,
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("idempotency key must be 1-255 characters")]
    InvalidIdempotencyKey,
    #[error("idempotency key has expired")]
    IdempotencyKeyExpired,
    #[error("idempotency key was used for a different purchase")]
    IdempotencyKeyMismatch,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl PurchaseError {
    /// Stable machine-readable code returned to clients
    pub fn code(&self) -> &'static str {
        match self {
            PurchaseError::Unauthenticated => "unauthenticated",
            PurchaseError::FormNotFound | PurchaseError::ProductNotFound => "not_found",
            PurchaseError::NotOwner => "not_owner",
            PurchaseError::FormNotPublished => "form_not_published",
            PurchaseError::ProductInactive => "product_inactive",
            PurchaseError::ProfileNotFound => "profile_not_found",
            PurchaseError::InsufficientCredits => "insufficient_credits",
            PurchaseError::InvalidIdempotencyKey => "invalid_idempotency_key",
            PurchaseError::IdempotencyKeyExpired => "idempotency_key_expired",
            PurchaseError::IdempotencyKeyMismatch => "idempotency_key_mismatch",
            PurchaseError::Database(_) => "internal_error",
        }
    }
}

impl From<LedgerError> for PurchaseError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits => PurchaseError::InsufficientCredits,
            LedgerError::ProfileNotFound => PurchaseError::ProfileNotFound,
            LedgerError::Database(e) => PurchaseError::Database(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("sign in to cancel a boost")]
    Unauthenticated,
    #[error("boost purchase not found")]
    NotFound,
    #[error("only the buyer can cancel this boost")]
    NotBuyer,
    #[error("boost is already cancelled")]
    AlreadyCancelled,
    #[error("boost has already completed")]
    AlreadyCompleted,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl CancelError {
    pub fn code(&self) -> &'static str {
        match self {
            CancelError::Unauthenticated => "unauthenticated",
            CancelError::NotFound => "not_found",
            CancelError::NotBuyer => "not_buyer",
            CancelError::AlreadyCancelled => "already_cancelled",
            CancelError::AlreadyCompleted => "already_completed",
            CancelError::Ledger(LedgerError::ProfileNotFound) => "profile_not_found",
            CancelError::Ledger(_) | CancelError::Database(_) => "internal_error",
        }
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct PurchaseRequest {
    pub form_id: Uuid,
    pub boost_product_id: Uuid,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct PurchaseOutcome {
    pub success: bool,
    pub message: String,
    pub purchase: BoostPurchaseWithStatus,
    pub balance: i64,
    /// True when an earlier purchase with the same idempotency key was returned
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct CancelOutcome {
    pub purchase: BoostPurchaseWithStatus,
    pub refund_credits: i64,
    pub balance: i64,
}

/// Credits returned when a boost is cancelled at `now`: everything before it
/// starts, the unused share of the window (rounded down) while it runs.
pub fn refund_for(
    price_credits: i64,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i64 {
    if now < start_at {
        return price_credits;
    }
    if now >= end_at {
        return 0;
    }
    let total = (end_at - start_at).num_milliseconds();
    if total <= 0 {
        return 0;
    }
    let remaining = (end_at - now).num_milliseconds();
    (i128::from(price_credits) * i128::from(remaining) / i128::from(total)) as i64
}

#[derive(Clone)]
pub struct BoostService {
    pool: SqlitePool,
    idempotency_window: Duration,
}

impl BoostService {
    pub fn new(pool: SqlitePool, idempotency_window: std::time::Duration) -> Self {
        let idempotency_window =
            Duration::from_std(idempotency_window).unwrap_or_else(|_| Duration::minutes(10));
        Self {
            pool,
            idempotency_window,
        }
    }

    pub async fn products(&self) -> Result<Vec<BoostProduct>, sqlx::Error> {
        BoostProduct::find_active(&self.pool).await
    }

    pub async fn purchases_by_buyer(
        &self,
        buyer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<BoostPurchaseWithStatus>, sqlx::Error> {
        Ok(BoostPurchase::find_by_buyer_id(&self.pool, buyer_id)
            .await?
            .into_iter()
            .map(|purchase| BoostPurchaseWithStatus::at(purchase, now))
            .collect())
    }

    pub async fn purchase(
        &self,
        caller: Option<Uuid>,
        request: &PurchaseRequest,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let buyer_id = caller.ok_or(PurchaseError::Unauthenticated)?;

        let idempotency_key = match request.idempotency_key.as_deref().map(str::trim) {
            None => None,
            Some(key) if key.is_empty() || key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN => {
                return Err(PurchaseError::InvalidIdempotencyKey);
            }
            Some(key) => Some(key.to_string()),
        };

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) =
                BoostPurchase::find_by_idempotency_key(&self.pool, buyer_id, key).await?
            {
                return self.replay(existing, request, now).await;
            }
        }

        let form = Form::find_by_id(&self.pool, request.form_id)
            .await?
            .ok_or(PurchaseError::FormNotFound)?;
        if form.owner_id != buyer_id {
            return Err(PurchaseError::NotOwner);
        }
        if form.status != FormStatus::Published {
            return Err(PurchaseError::FormNotPublished);
        }

        let product = BoostProduct::find_by_id(&self.pool, request.boost_product_id)
            .await?
            .ok_or(PurchaseError::ProductNotFound)?;
        if !product.is_active {
            return Err(PurchaseError::ProductInactive);
        }

        let data = CreateBoostPurchase {
            id: Uuid::new_v4(),
            form_id: form.id,
            buyer_id,
            boost_product_id: product.id,
            placement: product.placement,
            price_credits: product.price_credits,
            start_at: now,
            end_at: now + product.duration(),
            idempotency_key: idempotency_key.clone(),
            created_at: now,
        };

        match self.charge_and_insert(&data).await {
            Ok((purchase, balance)) => {
                info!(
                    purchase_id = %purchase.id,
                    buyer_id = %buyer_id,
                    form_id = %form.id,
                    product = %product.code,
                    price = product.price_credits,
                    balance,
                    "Boost purchased"
                );
                Ok(PurchaseOutcome {
                    success: true,
                    message: format!("Boost {} purchased", product.code),
                    purchase: BoostPurchaseWithStatus::at(purchase, now),
                    balance,
                    replayed: false,
                })
            }
            // Lost a race against a concurrent request carrying the same key;
            // our transaction rolled back, so answer with the winner's purchase.
            Err(PurchaseError::Database(e)) if is_unique_violation(&e) => {
                let key = idempotency_key.as_deref().ok_or(PurchaseError::Database(e))?;
                let existing = BoostPurchase::find_by_idempotency_key(&self.pool, buyer_id, key)
                    .await?
                    .ok_or(PurchaseError::IdempotencyKeyMismatch)?;
                self.replay(existing, request, now).await
            }
            Err(e) => {
                warn!(
                    buyer_id = %buyer_id,
                    form_id = %form.id,
                    code = e.code(),
                    "Boost purchase rejected"
                );
                Err(e)
            }
        }
    }

    /// Debit, ledger entry and purchase row in one transaction
    async fn charge_and_insert(
        &self,
        data: &CreateBoostPurchase,
    ) -> Result<(BoostPurchase, i64), PurchaseError> {
        let mut tx = self.pool.begin().await?;
        let (_, balance) = LedgerService::post_in(
            &mut tx,
            &NewLedgerEntry::boost_debit(data.buyer_id, data.price_credits, data.form_id, data.id),
        )
        .await?;
        let purchase = BoostPurchase::create(&mut tx, data).await?;
        tx.commit().await?;
        Ok((purchase, balance))
    }

    async fn replay(
        &self,
        existing: BoostPurchase,
        request: &PurchaseRequest,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        if existing.form_id != request.form_id
            || existing.boost_product_id != request.boost_product_id
        {
            return Err(PurchaseError::IdempotencyKeyMismatch);
        }
        if now - existing.created_at > self.idempotency_window {
            return Err(PurchaseError::IdempotencyKeyExpired);
        }

        let balance = Profile::balance(&self.pool, existing.buyer_id)
            .await?
            .ok_or(PurchaseError::ProfileNotFound)?;
        info!(purchase_id = %existing.id, "Replaying idempotent boost purchase");
        Ok(PurchaseOutcome {
            success: true,
            message: "Boost already purchased".to_string(),
            purchase: BoostPurchaseWithStatus::at(existing, now),
            balance,
            replayed: true,
        })
    }

    /// Cancel a scheduled or running boost and refund its unused share
    pub async fn cancel(
        &self,
        caller: Option<Uuid>,
        purchase_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, CancelError> {
        let caller = caller.ok_or(CancelError::Unauthenticated)?;
        let purchase = BoostPurchase::find_by_id(&self.pool, purchase_id)
            .await?
            .ok_or(CancelError::NotFound)?;
        if purchase.buyer_id != caller {
            return Err(CancelError::NotBuyer);
        }
        match purchase.status_at(now) {
            PromotionStatus::Cancelled => return Err(CancelError::AlreadyCancelled),
            PromotionStatus::Completed => return Err(CancelError::AlreadyCompleted),
            PromotionStatus::Scheduled | PromotionStatus::Running => {}
        }

        let refund =
            refund_for(purchase.price_credits, purchase.start_at, purchase.end_at, now);

        let mut tx = self.pool.begin().await?;
        if !BoostPurchase::mark_cancelled(&mut tx, purchase.id, now, refund).await? {
            return Err(CancelError::AlreadyCancelled);
        }
        let balance = if refund > 0 {
            let (_, balance) = LedgerService::post_in(
                &mut tx,
                &NewLedgerEntry::boost_refund(caller, refund, purchase.form_id, purchase.id),
            )
            .await?;
            balance
        } else {
            Profile::balance(&mut *tx, caller)
                .await?
                .ok_or(LedgerError::ProfileNotFound)?
        };
        let cancelled = BoostPurchase::find_by_id(&mut *tx, purchase.id)
            .await?
            .ok_or(CancelError::NotFound)?;
        tx.commit().await?;

        info!(
            purchase_id = %purchase.id,
            buyer_id = %caller,
            refund,
            balance,
            "Boost cancelled"
        );
        Ok(CancelOutcome {
            purchase: BoostPurchaseWithStatus::at(cancelled, now),
            refund_credits: refund,
            balance,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}
