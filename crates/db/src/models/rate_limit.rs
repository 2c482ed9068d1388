use sqlx::{Executor, Sqlite};

/// Fixed-window request counter shared by every server instance through the database.
pub struct RateLimitCounter;

impl RateLimitCounter {
    /// Count one hit for `bucket_key` in the window starting at `window_start`
    /// (unix seconds) and return the updated count.
    pub async fn hit<'e, E>(executor: E, bucket_key: &str, window_start: i64) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO rate_limit_counters (bucket_key, window_start, count)
               VALUES ($1, $2, 1)
               ON CONFLICT(bucket_key, window_start) DO UPDATE SET count = count + 1
               RETURNING count"#,
        )
        .bind(bucket_key)
        .bind(window_start)
        .fetch_one(executor)
        .await
    }

    /// Drop counters for windows that started before `older_than`
    pub async fn prune<'e, E>(executor: E, older_than: i64) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_start < $1")
            .bind(older_than)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
