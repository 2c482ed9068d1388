use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::boost_product::Placement;

/// Lifecycle of a boost. Never stored: always derived from the purchase's
/// time window, its cancellation timestamp and the current time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PromotionStatus {
    Scheduled,
    Running,
    Completed,
    Cancelled,
}

impl PromotionStatus {
    pub fn derive(
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        cancelled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        if cancelled_at.is_some() {
            PromotionStatus::Cancelled
        } else if now >= end_at {
            PromotionStatus::Completed
        } else if start_at <= now {
            PromotionStatus::Running
        } else {
            PromotionStatus::Scheduled
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct BoostPurchase {
    pub id: Uuid,
    pub form_id: Uuid,
    pub buyer_id: Uuid,
    pub boost_product_id: Uuid,
    pub placement: Placement, // snapshot of the product's placement at purchase time
    pub price_credits: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_credits: i64,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BoostPurchase {
    pub fn status_at(&self, now: DateTime<Utc>) -> PromotionStatus {
        PromotionStatus::derive(self.start_at, self.end_at, self.cancelled_at, now)
    }
}

/// A purchase together with its status as of the time it was read
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct BoostPurchaseWithStatus {
    #[serde(flatten)]
    #[ts(flatten)]
    pub purchase: BoostPurchase,
    pub status: PromotionStatus,
}

impl BoostPurchaseWithStatus {
    pub fn at(purchase: BoostPurchase, now: DateTime<Utc>) -> Self {
        let status = purchase.status_at(now);
        Self { purchase, status }
    }
}

impl std::ops::Deref for BoostPurchaseWithStatus {
    type Target = BoostPurchase;
    fn deref(&self) -> &Self::Target {
        &self.purchase
    }
}

#[derive(Debug, Clone)]
pub struct CreateBoostPurchase {
    pub id: Uuid,
    pub form_id: Uuid,
    pub buyer_id: Uuid,
    pub boost_product_id: Uuid,
    pub placement: Placement,
    pub price_credits: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

const PURCHASE_COLUMNS: &str = "id, form_id, buyer_id, boost_product_id, placement, price_credits, start_at, end_at, cancelled_at, refund_credits, idempotency_key, created_at";

impl BoostPurchase {
    pub async fn create(
        conn: &mut SqliteConnection,
        data: &CreateBoostPurchase,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, BoostPurchase>(&format!(
            r#"INSERT INTO boost_purchases (id, form_id, buyer_id, boost_product_id, placement, price_credits, start_at, end_at, idempotency_key, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING {PURCHASE_COLUMNS}"#
        ))
        .bind(data.id)
        .bind(data.form_id)
        .bind(data.buyer_id)
        .bind(data.boost_product_id)
        .bind(data.placement)
        .bind(data.price_credits)
        .bind(data.start_at)
        .bind(data.end_at)
        .bind(data.idempotency_key.as_deref())
        .bind(data.created_at)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, BoostPurchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM boost_purchases WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_idempotency_key<'e, E>(
        executor: E,
        buyer_id: Uuid,
        key: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, BoostPurchase>(&format!(
            r#"SELECT {PURCHASE_COLUMNS}
               FROM boost_purchases
               WHERE buyer_id = $1 AND idempotency_key = $2"#
        ))
        .bind(buyer_id)
        .bind(key)
        .fetch_optional(executor)
        .await
    }

    /// Newest first
    pub async fn find_by_form_id(pool: &SqlitePool, form_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, BoostPurchase>(&format!(
            r#"SELECT {PURCHASE_COLUMNS}
               FROM boost_purchases
               WHERE form_id = $1
               ORDER BY julianday(created_at) DESC, rowid DESC"#
        ))
        .bind(form_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_buyer_id(pool: &SqlitePool, buyer_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, BoostPurchase>(&format!(
            r#"SELECT {PURCHASE_COLUMNS}
               FROM boost_purchases
               WHERE buyer_id = $1
               ORDER BY julianday(created_at) DESC, rowid DESC"#
        ))
        .bind(buyer_id)
        .fetch_all(pool)
        .await
    }

    /// Uncancelled purchases whose window contains `now`. Callers still apply
    /// `status_at` so the exact boundary rule lives in one place.
    pub async fn find_live(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, BoostPurchase>(&format!(
            r#"SELECT {PURCHASE_COLUMNS}
               FROM boost_purchases
               WHERE cancelled_at IS NULL
                 AND julianday(start_at) <= julianday($1)
                 AND julianday($1) < julianday(end_at)"#
        ))
        .bind(now)
        .fetch_all(pool)
        .await
    }

    /// Returns false if the purchase was already cancelled
    pub async fn mark_cancelled(
        conn: &mut SqliteConnection,
        id: Uuid,
        cancelled_at: DateTime<Utc>,
        refund_credits: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE boost_purchases
               SET cancelled_at = $2, refund_credits = $3
               WHERE id = $1 AND cancelled_at IS NULL"#,
        )
        .bind(id)
        .bind(cancelled_at)
        .bind(refund_credits)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_status_before_window_is_scheduled() {
        assert_eq!(
            PromotionStatus::derive(t(10), t(12), None, t(9)),
            PromotionStatus::Scheduled
        );
    }

    #[test]
    fn test_status_start_is_inclusive() {
        assert_eq!(
            PromotionStatus::derive(t(10), t(12), None, t(10)),
            PromotionStatus::Running
        );
    }

    #[test]
    fn test_status_end_is_exclusive() {
        assert_eq!(
            PromotionStatus::derive(t(10), t(12), None, t(12) - Duration::milliseconds(1)),
            PromotionStatus::Running
        );
        assert_eq!(
            PromotionStatus::derive(t(10), t(12), None, t(12)),
            PromotionStatus::Completed
        );
    }

    #[test]
    fn test_cancellation_wins_over_time() {
        for now in [t(9), t(11), t(13)] {
            assert_eq!(
                PromotionStatus::derive(t(10), t(12), Some(t(11)), now),
                PromotionStatus::Cancelled
            );
        }
    }
}
