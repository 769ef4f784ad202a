use crate::config::DatabaseConfig;
use crate::models::{
    AdGroupRecord, AdGroupStatus, AlertRecord, MetricValue, MetricsRow, MetricsSnapshot, NewAlert,
};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::{Config, Row};
use tracing::{info, warn};

const APPLICATION_NAME: &str = "ad-metrics-worker";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] tokio_postgres::Error),
    #[error("SSL error: {0}")]
    SslError(#[from] openssl::error::ErrorStack),
    #[error("Database pool error: {0}")]
    PoolError(#[from] deadpool_postgres::PoolError),
    #[error("Database pool setup error: {0}")]
    PoolBuildError(#[from] deadpool_postgres::BuildError),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

/// Persistence for ad groups, metrics and alerts.
#[async_trait]
pub trait AdStore: Send + Sync {
    /// Insert-or-overwrite keyed on `(advertiser_id, adgroup_id)`.
    async fn upsert_ad_groups(&self, records: &[AdGroupRecord]) -> Result<u64, DatabaseError>;

    async fn list_enabled_ad_groups(&self, advertiser_id: &str)
        -> Result<Vec<String>, DatabaseError>;

    /// Appends one batch of metrics, all stamped `ENABLE` with a single
    /// shared `created_at`.
    async fn insert_metrics(&self, rows: &[MetricsSnapshot]) -> Result<u64, DatabaseError>;

    /// Rows still awaiting evaluation: `status = ENABLE` and no alert.
    async fn pending_metrics(&self, advertiser_id: &str) -> Result<Vec<MetricsRow>, DatabaseError>;

    /// Newest stored row per ad group, regardless of evaluation state.
    async fn latest_metrics(&self, advertiser_id: &str) -> Result<Vec<MetricsRow>, DatabaseError>;

    /// Creates the alert and consumes the metrics row as one unit. Returns
    /// `None` when the row was already consumed, in which case nothing is
    /// written.
    async fn record_alert(
        &self,
        metrics_row_id: i64,
        alert: &NewAlert,
    ) -> Result<Option<AlertRecord>, DatabaseError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ad_groups (
    advertiser_id TEXT NOT NULL,
    adgroup_id    TEXT NOT NULL,
    status        TEXT NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (advertiser_id, adgroup_id)
);

CREATE TABLE IF NOT EXISTS alerts (
    id                  BIGSERIAL PRIMARY KEY,
    adgroup_id          TEXT NOT NULL,
    cost_per_conversion DOUBLE PRECISION NOT NULL,
    trigger_time        TIMESTAMPTZ NOT NULL,
    message             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ad_metrics (
    id                  BIGSERIAL PRIMARY KEY,
    advertiser_id       TEXT NOT NULL,
    adgroup_id          TEXT NOT NULL,
    date_range          TEXT NOT NULL,
    spend               TEXT,
    conversion          TEXT,
    cost_per_conversion TEXT,
    click               TEXT,
    cpc                 TEXT,
    ctr                 TEXT,
    status              TEXT NOT NULL,
    alert_id            BIGINT REFERENCES alerts (id),
    created_at          TIMESTAMPTZ NOT NULL,
    CHECK (alert_id IS NULL OR status = 'DISABLE')
);

CREATE INDEX IF NOT EXISTS ad_metrics_pending_idx
    ON ad_metrics (advertiser_id, adgroup_id, created_at DESC)
    WHERE alert_id IS NULL;
";

const METRICS_COLUMNS: &str = "id, advertiser_id, adgroup_id, date_range, spend, conversion, \
     cost_per_conversion, click, cpc, ctr, status, alert_id, created_at";

pub struct Database {
    pool: Pool,
}

impl Database {
    /// Builds the connection pool and checks out one connection so a bad
    /// URL or unreachable server fails at startup.
    ///
    /// Pooled connections are verified with a round trip before reuse, so
    /// a backend that was restarted or terminated is replaced on the next
    /// checkout instead of failing every later query.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        if !config.tls_verify {
            warn!("Database TLS certificate verification is disabled");
            builder.set_verify(SslVerifyMode::NONE);
        }
        let connector = MakeTlsConnector::new(builder.build());

        let mut pg_config = Config::from_str(&config.url)
            .map_err(|e| DatabaseError::InvalidConnectionString(e.to_string()))?;
        pg_config.connect_timeout(Duration::from_secs(5));
        if pg_config.get_application_name().is_none() {
            pg_config.application_name(APPLICATION_NAME);
        }

        let manager = Manager::from_config(
            pg_config,
            connector,
            ManagerConfig {
                recycling_method: RecyclingMethod::Verified,
            },
        );
        let pool = Pool::builder(manager).max_size(config.pool_size).build()?;

        drop(pool.get().await?);
        info!(pool_size = config.pool_size, "Database pool ready");

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        self.pool.get().await?.batch_execute(SCHEMA).await?;
        Ok(())
    }
}

fn metric_text(value: &Option<MetricValue>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

fn metrics_row(row: &Row) -> Result<MetricsRow, DatabaseError> {
    let status: String = row.try_get("status")?;
    let metric = |column: &str| -> Result<Option<MetricValue>, DatabaseError> {
        let value: Option<String> = row.try_get(column)?;
        Ok(value.map(MetricValue::Text))
    };

    Ok(MetricsRow {
        id: row.try_get("id")?,
        metrics: MetricsSnapshot {
            advertiser_id: row.try_get("advertiser_id")?,
            adgroup_id: row.try_get("adgroup_id")?,
            date_range: row.try_get("date_range")?,
            spend: metric("spend")?,
            conversion: metric("conversion")?,
            cost_per_conversion: metric("cost_per_conversion")?,
            click: metric("click")?,
            cpc: metric("cpc")?,
            ctr: metric("ctr")?,
        },
        status: AdGroupStatus::from_str(&status).map_err(DatabaseError::InvalidRow)?,
        alert_id: row.try_get("alert_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AdStore for Database {
    async fn upsert_ad_groups(&self, records: &[AdGroupRecord]) -> Result<u64, DatabaseError> {
        if records.is_empty() {
            info!("No ad groups to upsert");
            return Ok(0);
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let statement = tx
            .prepare_cached(
                "INSERT INTO ad_groups (advertiser_id, adgroup_id, status, updated_at)
                 VALUES ($1, $2, $3, NOW())
                 ON CONFLICT (advertiser_id, adgroup_id)
                 DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at",
            )
            .await?;

        let mut affected = 0;
        for record in records {
            affected += tx
                .execute(
                    &statement,
                    &[&record.advertiser_id, &record.adgroup_id, &record.status.as_str()],
                )
                .await?;
        }
        tx.commit().await?;

        info!(count = affected, "Upserted ad groups");
        Ok(affected)
    }

    async fn list_enabled_ad_groups(
        &self,
        advertiser_id: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        let rows = self
            .pool
            .get()
            .await?
            .query(
                "SELECT adgroup_id FROM ad_groups
                 WHERE advertiser_id = $1 AND status = $2
                 ORDER BY adgroup_id",
                &[&advertiser_id, &AdGroupStatus::Enable.as_str()],
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get(0).map_err(DatabaseError::from))
            .collect()
    }

    async fn insert_metrics(&self, rows: &[MetricsSnapshot]) -> Result<u64, DatabaseError> {
        if rows.is_empty() {
            info!("No metrics to insert");
            return Ok(0);
        }

        let created_at = Utc::now();
        let status = AdGroupStatus::Enable.as_str();

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let statement = tx
            .prepare_cached(
                "INSERT INTO ad_metrics (advertiser_id, adgroup_id, date_range, spend, conversion,
                     cost_per_conversion, click, cpc, ctr, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .await?;

        let mut inserted = 0;
        for row in rows {
            inserted += tx
                .execute(
                    &statement,
                    &[
                        &row.advertiser_id,
                        &row.adgroup_id,
                        &row.date_range,
                        &metric_text(&row.spend),
                        &metric_text(&row.conversion),
                        &metric_text(&row.cost_per_conversion),
                        &metric_text(&row.click),
                        &metric_text(&row.cpc),
                        &metric_text(&row.ctr),
                        &status,
                        &created_at,
                    ],
                )
                .await?;
        }
        tx.commit().await?;

        info!(count = inserted, "Inserted metrics rows");
        Ok(inserted)
    }

    async fn pending_metrics(&self, advertiser_id: &str) -> Result<Vec<MetricsRow>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM ad_metrics
             WHERE advertiser_id = $1 AND status = $2 AND alert_id IS NULL",
            METRICS_COLUMNS
        );
        let rows = self
            .pool
            .get()
            .await?
            .query(&query, &[&advertiser_id, &AdGroupStatus::Enable.as_str()])
            .await?;

        rows.iter().map(metrics_row).collect()
    }

    async fn latest_metrics(&self, advertiser_id: &str) -> Result<Vec<MetricsRow>, DatabaseError> {
        let query = format!(
            "SELECT DISTINCT ON (adgroup_id) {} FROM ad_metrics
             WHERE advertiser_id = $1
             ORDER BY adgroup_id, created_at DESC, id DESC",
            METRICS_COLUMNS
        );
        let rows = self
            .pool
            .get()
            .await?
            .query(&query, &[&advertiser_id])
            .await?;

        rows.iter().map(metrics_row).collect()
    }

    async fn record_alert(
        &self,
        metrics_row_id: i64,
        alert: &NewAlert,
    ) -> Result<Option<AlertRecord>, DatabaseError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO alerts (adgroup_id, cost_per_conversion, trigger_time, message)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id",
                &[
                    &alert.adgroup_id,
                    &alert.cost_per_conversion,
                    &alert.trigger_time,
                    &alert.message,
                ],
            )
            .await?;
        let alert_id: i64 = row.try_get(0)?;

        let consumed = tx
            .execute(
                "UPDATE ad_metrics SET alert_id = $1, status = $2
                 WHERE id = $3 AND alert_id IS NULL",
                &[&alert_id, &AdGroupStatus::Disable.as_str(), &metrics_row_id],
            )
            .await?;

        if consumed == 0 {
            tx.rollback().await?;
            warn!(metrics_row_id, "Metrics row already consumed, alert discarded");
            return Ok(None);
        }
        tx.commit().await?;

        info!(metrics_row_id, alert_id, "Metrics row consumed by alert");
        Ok(Some(AlertRecord {
            id: alert_id,
            adgroup_id: alert.adgroup_id.clone(),
            cost_per_conversion: alert.cost_per_conversion,
            trigger_time: alert.trigger_time,
            message: alert.message.clone(),
        }))
    }
}
