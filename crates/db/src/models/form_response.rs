use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use ts_rs::TS;
use uuid::Uuid;

/// A submitted response. `quality_score` is a derived heuristic, not an accounting record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct FormResponse {
    pub id: Uuid,
    pub form_id: Uuid,
    pub respondent_id: Option<Uuid>, // None for anonymous respondents
    pub answers: String,             // JSON
    pub duration_sec: i64,
    pub quality_score: f64,
    pub rewarded_credits: i64,
    pub submitted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateFormResponse {
    pub id: Uuid,
    pub form_id: Uuid,
    pub respondent_id: Option<Uuid>,
    pub answers: serde_json::Value,
    pub duration_sec: i64,
    pub quality_score: f64,
    pub submitted_at: DateTime<Utc>,
}

const RESPONSE_COLUMNS: &str = "id, form_id, respondent_id, answers, duration_sec, quality_score, rewarded_credits, submitted_at, created_at";

impl FormResponse {
    pub async fn create(
        conn: &mut SqliteConnection,
        data: &CreateFormResponse,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, FormResponse>(&format!(
            r#"INSERT INTO form_responses (id, form_id, respondent_id, answers, duration_sec, quality_score, submitted_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {RESPONSE_COLUMNS}"#
        ))
        .bind(data.id)
        .bind(data.form_id)
        .bind(data.respondent_id)
        .bind(data.answers.to_string())
        .bind(data.duration_sec)
        .bind(data.quality_score)
        .bind(data.submitted_at)
        .fetch_one(conn)
        .await
    }

    pub async fn set_rewarded_credits(
        conn: &mut SqliteConnection,
        id: Uuid,
        credits: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE form_responses SET rewarded_credits = $2 WHERE id = $1")
            .bind(id)
            .bind(credits)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, FormResponse>(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM form_responses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_form_id<'e, E>(executor: E, form_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, FormResponse>(&format!(
            r#"SELECT {RESPONSE_COLUMNS}
               FROM form_responses
               WHERE form_id = $1
               ORDER BY rowid DESC"#
        ))
        .bind(form_id)
        .fetch_all(executor)
        .await
    }
}
