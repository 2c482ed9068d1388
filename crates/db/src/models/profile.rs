use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// A user profile. `credits_balance` is the materialised fold of the user's
/// ledger entries and is only written alongside a ledger append (or by reconciliation).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub credits_balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PROFILE_COLUMNS: &str = "id, display_name, credits_balance, created_at, updated_at";

impl Profile {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Insert a zero-balance profile. Returns false when it already existed.
    pub async fn create_if_missing<'e, E>(
        executor: E,
        id: Uuid,
        display_name: Option<&str>,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"INSERT INTO profiles (id, display_name, credits_balance)
               VALUES ($1, $2, 0)
               ON CONFLICT(id) DO NOTHING"#,
        )
        .bind(id)
        .bind(display_name)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn balance<'e, E>(executor: E, id: Uuid) -> Result<Option<i64>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>("SELECT credits_balance FROM profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Atomic in-place increment; returns the new balance, or None if the profile is missing.
    /// Takes a connection so it can only be used inside the transaction that appends the ledger entry.
    pub async fn apply_delta(
        conn: &mut SqliteConnection,
        id: Uuid,
        delta: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"UPDATE profiles
               SET credits_balance = credits_balance + $2,
                   updated_at = datetime('now', 'subsec')
               WHERE id = $1
               RETURNING credits_balance"#,
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(conn)
        .await
    }

    /// Compare-and-debit in a single statement. None means the balance was
    /// below `amount` (or the profile does not exist) and nothing changed.
    pub async fn try_debit(
        conn: &mut SqliteConnection,
        id: Uuid,
        amount: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"UPDATE profiles
               SET credits_balance = credits_balance - $2,
                   updated_at = datetime('now', 'subsec')
               WHERE id = $1 AND credits_balance >= $2
               RETURNING credits_balance"#,
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(conn)
        .await
    }

    /// Rewrite the projection as the sum of the user's ledger entries in a
    /// single statement. Returns the repaired balance, or None if the profile is missing.
    pub async fn recompute_balance(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"UPDATE profiles
               SET credits_balance = (
                       SELECT COALESCE(SUM(amount), 0) FROM credits_ledger WHERE user_id = $1
                   ),
                   updated_at = datetime('now', 'subsec')
               WHERE id = $1
               RETURNING credits_balance"#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_all_ids(pool: &SqlitePool) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM profiles ORDER BY rowid")
            .fetch_all(pool)
            .await
    }
}
