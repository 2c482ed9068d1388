use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "form_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FormStatus {
    #[default]
    Draft,
    Published,
    Closed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Form {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub estimated_time: i32, // minutes
    pub difficulty: i32,     // 1-10
    pub reward: i64,         // advertised per-completion reward computed at generation time
    pub status: FormStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateForm {
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub estimated_time: i32,
    pub difficulty: i32,
    pub reward: i64,
    pub status: Option<FormStatus>,
}

const FORM_COLUMNS: &str = "id, owner_id, title, description, category, estimated_time, difficulty, reward, status, created_at, updated_at";

impl Form {
    pub async fn create(
        conn: &mut SqliteConnection,
        id: Uuid,
        data: &CreateForm,
    ) -> Result<Self, sqlx::Error> {
        let status = data.status.unwrap_or_default();
        sqlx::query_as::<_, Form>(&format!(
            r#"INSERT INTO forms (id, owner_id, title, description, category, estimated_time, difficulty, reward, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING {FORM_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.owner_id)
        .bind(&data.title)
        .bind(data.description.as_deref())
        .bind(data.category.as_deref())
        .bind(data.estimated_time)
        .bind(data.difficulty)
        .bind(data.reward)
        .bind(status)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Form>(&format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_owner_id<'e, E>(executor: E, owner_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Form>(&format!(
            r#"SELECT {FORM_COLUMNS}
               FROM forms
               WHERE owner_id = $1
               ORDER BY rowid DESC"#
        ))
        .bind(owner_id)
        .fetch_all(executor)
        .await
    }

    pub async fn update_status<'e, E>(executor: E, id: Uuid, status: FormStatus) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE forms SET status = $2, updated_at = datetime('now', 'subsec') WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_all<'e, E>(executor: E) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM forms")
            .fetch_one(executor)
            .await
    }
}
