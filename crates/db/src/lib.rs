use std::{str::FromStr, time::Duration};

use sqlx::{
    Error, Pool, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use tracing::info;

pub mod models;

/// Writers queue on the database lock for at most this long before failing with SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    /// Open (creating if needed) the database at `database_url` and apply pending migrations.
    pub async fn new(database_url: &str) -> Result<DBService, Error> {
        Self::with_max_connections(database_url, 8).await
    }

    pub async fn with_max_connections(
        database_url: &str,
        max_connections: u32,
    ) -> Result<DBService, Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(database_url = %database_url, "Database ready");
        Ok(DBService { pool })
    }

    /// A private in-memory database. Single connection, since every
    /// `:memory:` connection would otherwise see its own empty database.
    pub async fn new_in_memory() -> Result<DBService, Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(DBService { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
