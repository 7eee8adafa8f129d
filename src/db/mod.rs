//! SQLite trade journal.
//!
//! Records every instance that was started and every execution attempt so
//! the operator can review history after a restart:
//! - Instance creation parameters and stop time
//! - Executions with fill price, reference price and realized return
//! - Failed executions with the error text

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::warn;

use crate::models::{Command, InstanceConfig};

/// Outcome of an execution attempt as journaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Executed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Executed => "executed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// One execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub instance: String,
    pub side: Command,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub reference_price: Decimal,
    pub realized_percent: Option<Decimal>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Sink for execution records. Implementations must not fail the caller.
#[async_trait]
pub trait ExecutionJournal: Send + Sync {
    async fn record_execution(&self, record: &ExecutionRecord);
    async fn record_instance_started(&self, config: &InstanceConfig);
    async fn record_instance_stopped(&self, name: &str);
}

/// Journal that drops everything.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct NoopJournal;

#[cfg(test)]
#[async_trait]
impl ExecutionJournal for NoopJournal {
    async fn record_execution(&self, _record: &ExecutionRecord) {}
    async fn record_instance_started(&self, _config: &InstanceConfig) {}
    async fn record_instance_stopped(&self, _name: &str) {}
}

/// Stored execution row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredExecution {
    pub id: String,
    pub instance: String,
    pub side: String,
    pub quantity: Option<String>,
    pub price: Option<String>,
    pub reference_price: String,
    pub realized_percent: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub executed_at: String,
}

/// Stored instance row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredInstance {
    pub name: String,
    pub symbol: String,
    pub amount: String,
    pub mode: String,
    pub listener: String,
    pub take_profit_percent: String,
    pub stop_loss_percent: String,
    pub created_at: String,
    pub stopped_at: Option<String>,
}

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the journal database.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                amount TEXT NOT NULL,
                mode TEXT NOT NULL,
                listener TEXT NOT NULL,
                take_profit_percent TEXT NOT NULL,
                stop_loss_percent TEXT NOT NULL,
                created_at TEXT NOT NULL,
                stopped_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                instance TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT,
                price TEXT,
                reference_price TEXT NOT NULL,
                realized_percent TEXT,
                status TEXT NOT NULL,
                error_message TEXT,
                executed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_instance ON executions(instance, executed_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn save_instance(&self, config: &InstanceConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances
                (name, symbol, amount, mode, listener, take_profit_percent, stop_loss_percent, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.name)
        .bind(&config.symbol)
        .bind(config.amount.to_string())
        .bind(config.mode.as_str())
        .bind(&config.listener)
        .bind(config.initial_limits.take_profit_percent.to_string())
        .bind(config.initial_limits.stop_loss_percent.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save instance")?;

        Ok(())
    }

    pub async fn mark_instance_stopped(&self, name: &str) -> Result<()> {
        sqlx::query("UPDATE instances SET stopped_at = ? WHERE name = ? AND stopped_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to mark instance stopped")?;

        Ok(())
    }

    pub async fn save_execution(&self, record: &ExecutionRecord) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO executions
                (id, instance, side, quantity, price, reference_price, realized_percent,
                 status, error_message, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&record.instance)
        .bind(record.side.as_str())
        .bind(record.quantity.map(|q| q.to_string()))
        .bind(record.price.map(|p| p.to_string()))
        .bind(record.reference_price.to_string())
        .bind(record.realized_percent.map(|p| p.to_string()))
        .bind(record.status.as_str())
        .bind(record.error.as_deref())
        .bind(record.executed_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(id)
    }

    /// Most recent executions, newest first, optionally for one instance.
    pub async fn recent_executions(
        &self,
        instance: Option<&str>,
        limit: u32,
    ) -> Result<Vec<StoredExecution>> {
        let rows = match instance {
            Some(name) => {
                sqlx::query_as::<_, StoredExecution>(
                    "SELECT * FROM executions WHERE instance = ? ORDER BY executed_at DESC LIMIT ?",
                )
                .bind(name)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, StoredExecution>(
                    "SELECT * FROM executions ORDER BY executed_at DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    /// Instances in creation order.
    pub async fn instances(&self) -> Result<Vec<StoredInstance>> {
        let rows = sqlx::query_as::<_, StoredInstance>(
            r#"
            SELECT name, symbol, amount, mode, listener, take_profit_percent,
                   stop_loss_percent, created_at, stopped_at
            FROM instances ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Execution counts (executed, failed) for an instance.
    pub async fn execution_stats(&self, instance: &str) -> Result<(i64, i64)> {
        let (executed, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'executed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
            FROM executions WHERE instance = ?
            "#,
        )
        .bind(instance)
        .fetch_one(&self.pool)
        .await?;

        Ok((executed, failed))
    }
}

#[async_trait]
impl ExecutionJournal for Database {
    async fn record_execution(&self, record: &ExecutionRecord) {
        if let Err(e) = self.save_execution(record).await {
            warn!(instance = %record.instance, error = %e, "Failed to journal execution");
        }
    }

    async fn record_instance_started(&self, config: &InstanceConfig) {
        if let Err(e) = self.save_instance(config).await {
            warn!(instance = %config.name, error = %e, "Failed to journal instance");
        }
    }

    async fn record_instance_stopped(&self, name: &str) {
        if let Err(e) = self.mark_instance_stopped(name).await {
            warn!(instance = %name, error = %e, "Failed to journal instance stop");
        }
    }
}
