use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Feed slot a boost targets
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS, EnumString, Display,
)]
#[sqlx(type_name = "placement", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Placement {
    NeedsResponses,
    ForYou,
    Pin,
}

impl Placement {
    /// Feed precedence: pin > for_you > needs_responses
    pub fn rank(self) -> u8 {
        match self {
            Placement::Pin => 3,
            Placement::ForYou => 2,
            Placement::NeedsResponses => 1,
        }
    }
}

/// A purchasable promotion product. Read-only to the purchase flow.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct BoostProduct {
    pub id: Uuid,
    pub code: String,
    pub description: String,
    pub duration_hours: i32,
    pub price_credits: i64,
    pub placement: Placement,
    pub is_active: bool,
    pub expected_lift: Option<String>, // JSON, advisory only
}

impl BoostProduct {
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.duration_hours))
    }
}

const PRODUCT_COLUMNS: &str =
    "id, code, description, duration_hours, price_credits, placement, is_active, expected_lift";

impl BoostProduct {
    pub async fn find_active(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, BoostProduct>(&format!(
            r#"SELECT {PRODUCT_COLUMNS}
               FROM boost_products
               WHERE is_active = 1
               ORDER BY price_credits ASC, code ASC"#
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, BoostProduct>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM boost_products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_code<'e, E>(executor: E, code: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, BoostProduct>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM boost_products WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(executor)
        .await
    }

    /// Administrative toggle; the catalog is otherwise managed outside this service
    pub async fn set_active(pool: &SqlitePool, id: Uuid, is_active: bool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE boost_products SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
