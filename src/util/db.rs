use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Postgres, Transaction,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

pub type PgTx = Transaction<'static, Postgres>;

/// Single-connection handle used by every maintenance binary.
///
/// The scripts never run schema migrations; DDL goes through `run_sql`.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)
            .context("database URL is not a valid postgres DSN")?
            .application_name("clinic-upkeep");

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        // PgBouncer txn mode safe
        connect_options = connect_options.statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await
            .context("failed to connect to database")?;
        info!("connected to database");
        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<PgTx> {
        let tx = self.pool.begin().await.context("BEGIN failed")?;
        info!("transaction started");
        Ok(tx)
    }

    /// Resolves through search_path, matching how every query in the scripts is written.
    pub async fn table_visible(&self, table: &str) -> Result<bool> {
        let visible: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .persistent(false)
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(visible)
    }

    pub async fn close(self) {
        self.pool.close().await;
        info!("database connection closed");
    }
}

/// Commit or roll back depending on the outcome of the pass, logging either way.
pub async fn finish_tx<T>(tx: PgTx, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(v) => {
            tx.commit().await.context("COMMIT failed")?;
            info!("transaction committed");
            Ok(v)
        }
        Err(e) => {
            match tx.rollback().await {
                Ok(()) => info!("transaction rolled back"),
                Err(rb) => tracing::error!(error = %rb, "failed to roll back transaction"),
            }
            Err(e)
        }
    }
}
