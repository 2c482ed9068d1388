use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Why a ledger entry was written
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display,
)]
#[sqlx(type_name = "ledger_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LedgerReason {
    /// Reward for a completed response
    CompleteForm,
    /// Debit for a boost purchase
    PromoteForm,
    RequestRespondents,
    WelcomeBonus,
    /// Pro-rata refund of a cancelled boost
    BoostRefund,
    Adjustment,
}

/// An immutable signed credit movement. Positive is a credit, negative a debit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: LedgerReason,
    pub related_form_id: Option<Uuid>,
    pub related_response_id: Option<Uuid>,
    pub related_purchase_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: LedgerReason,
    pub related_form_id: Option<Uuid>,
    pub related_response_id: Option<Uuid>,
    pub related_purchase_id: Option<Uuid>,
}

impl NewLedgerEntry {
    pub fn welcome_bonus(user_id: Uuid, amount: i64) -> Self {
        Self {
            user_id,
            amount,
            reason: LedgerReason::WelcomeBonus,
            related_form_id: None,
            related_response_id: None,
            related_purchase_id: None,
        }
    }

    pub fn completion_reward(user_id: Uuid, amount: i64, form_id: Uuid, response_id: Uuid) -> Self {
        Self {
            user_id,
            amount,
            reason: LedgerReason::CompleteForm,
            related_form_id: Some(form_id),
            related_response_id: Some(response_id),
            related_purchase_id: None,
        }
    }

    /// Debit for a boost; `price` is positive, the stored amount is its negation
    pub fn boost_debit(user_id: Uuid, price: i64, form_id: Uuid, purchase_id: Uuid) -> Self {
        Self {
            user_id,
            amount: -price,
            reason: LedgerReason::PromoteForm,
            related_form_id: Some(form_id),
            related_response_id: None,
            related_purchase_id: Some(purchase_id),
        }
    }

    pub fn boost_refund(user_id: Uuid, amount: i64, form_id: Uuid, purchase_id: Uuid) -> Self {
        Self {
            user_id,
            amount,
            reason: LedgerReason::BoostRefund,
            related_form_id: Some(form_id),
            related_response_id: None,
            related_purchase_id: Some(purchase_id),
        }
    }
}

const LEDGER_COLUMNS: &str = "id, user_id, amount, reason, related_form_id, related_response_id, related_purchase_id, created_at";

impl LedgerEntry {
    /// Append an entry. Requires a connection (normally `&mut *tx`) because an
    /// append is never valid without the matching balance update in the same transaction.
    pub async fn append(
        conn: &mut SqliteConnection,
        entry: &NewLedgerEntry,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"INSERT INTO credits_ledger (id, user_id, amount, reason, related_form_id, related_response_id, related_purchase_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {LEDGER_COLUMNS}"#
        ))
        .bind(id)
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(entry.reason)
        .bind(entry.related_form_id)
        .bind(entry.related_response_id)
        .bind(entry.related_purchase_id)
        .fetch_one(conn)
        .await
    }

    /// Newest first
    pub async fn find_by_user(
        pool: &SqlitePool,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"SELECT {LEDGER_COLUMNS}
               FROM credits_ledger
               WHERE user_id = $1
               ORDER BY rowid DESC
               LIMIT $2"#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_purchase<'e, E>(
        executor: E,
        purchase_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"SELECT {LEDGER_COLUMNS}
               FROM credits_ledger
               WHERE related_purchase_id = $1
               ORDER BY rowid ASC"#
        ))
        .bind(purchase_id)
        .fetch_all(executor)
        .await
    }

    /// Sum of every entry for the user: the value the balance projection must equal
    pub async fn sum_for_user<'e, E>(executor: E, user_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0) FROM credits_ledger WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(executor)
        .await
    }

    pub async fn count_for_user<'e, E>(executor: E, user_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM credits_ledger WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(executor)
            .await
    }

    /// Whether the user already received a completion reward for this form
    pub async fn has_completion_reward<'e, E>(
        executor: E,
        user_id: Uuid,
        form_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM credits_ledger
               WHERE user_id = $1 AND related_form_id = $2 AND reason = 'complete_form'"#,
        )
        .bind(user_id)
        .bind(form_id)
        .fetch_one(executor)
        .await?;
        Ok(count > 0)
    }
}
