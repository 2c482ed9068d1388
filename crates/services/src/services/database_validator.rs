//! Schema checks backing the health endpoint

use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;

pub const REQUIRED_TABLES: &[&str] = &[
    "profiles",
    "forms",
    "questions",
    "form_responses",
    "boost_products",
    "boost_purchases",
    "credits_ledger",
    "rate_limit_counters",
];

#[derive(Debug, Error)]
pub enum DatabaseValidationError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct DatabaseValidator {
    pool: SqlitePool,
}

impl DatabaseValidator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn validate(&self) -> Result<ValidationResult, DatabaseValidationError> {
        let migrations_table_exists = self.table_exists("_sqlx_migrations").await?;
        if !migrations_table_exists {
            warn!("Database not initialized: _sqlx_migrations is missing");
            return Ok(ValidationResult {
                is_initialized: false,
                migrations_applied: 0,
                latest_migration: None,
                missing_tables: REQUIRED_TABLES.iter().map(|t| t.to_string()).collect(),
                active_products: 0,
            });
        }

        let migrations_applied = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        let latest_migration = sqlx::query_scalar::<_, String>(
            "SELECT description FROM _sqlx_migrations WHERE success = 1 ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let mut missing_tables = Vec::new();
        for table in REQUIRED_TABLES {
            if !self.table_exists(table).await? {
                missing_tables.push(table.to_string());
            }
        }

        let active_products = if missing_tables.iter().any(|t| t == "boost_products") {
            0
        } else {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM boost_products WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await?
        };

        let result = ValidationResult {
            is_initialized: true,
            migrations_applied,
            latest_migration,
            missing_tables,
            active_products,
        };
        info!(
            migrations_applied,
            ok = result.is_ok(),
            "Database validation complete"
        );
        Ok(result)
    }

    async fn table_exists(&self, name: &str) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct ValidationResult {
    pub is_initialized: bool,
    pub migrations_applied: i64,
    pub latest_migration: Option<String>,
    pub missing_tables: Vec<String>,
    pub active_products: i64,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.is_initialized && self.missing_tables.is_empty()
    }

    pub fn summary(&self) -> String {
        if !self.is_initialized {
            "Database not initialized - migrations need to be run".to_string()
        } else if !self.missing_tables.is_empty() {
            format!("Missing tables: {}", self.missing_tables.join(", "))
        } else {
            format!(
                "Database OK - {} migrations applied, {} active boost products",
                self.migrations_applied, self.active_products
            )
        }
    }
}
