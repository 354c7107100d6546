//! # SQLite Postback Store
//!
//! [`PostbackStore`] backed by a SQLite database through an `sqlx` pool.
//!
//! File databases run in WAL mode so reconciliation reads do not block the
//! batch writers. Inserts are multi-row `INSERT OR IGNORE` statements inside
//! one transaction per batch.

use crate::store::{PostbackStore, RunSummary};
use crate::{
    MmpExtensions, PostbackRecord, ReceivedPostback, RequestId, StoreError, StoreResult, TestId,
    TestMetrics, ValidationError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    QueryBuilder, Row, Sqlite, SqlitePool,
};
use std::str::FromStr;
use tracing::{debug, info, instrument};

/// Rows per multi-row insert statement
const INSERT_CHUNK_ROWS: usize = 500;

const SENT_COLUMNS: &str = "request_id, test_id, postback_type, event_name, source_id, \
     campaign_id, placement_id, adset_id, ad_id, advertising_id, country, click_id, mmp";

const RECEIVED_COLUMNS: &str = "request_id, test_id, postback_type, event_name, source_id, \
     campaign_id, placement_id, adset_id, ad_id, advertising_id, country, click_id, mmp, \
     gaid, idfa";

const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS sending_requests (
        request_id TEXT PRIMARY KEY,
        test_id TEXT NOT NULL,
        postback_type TEXT NOT NULL,
        event_name TEXT NOT NULL,
        source_id TEXT NOT NULL,
        campaign_id TEXT NOT NULL,
        placement_id TEXT NOT NULL,
        adset_id TEXT NOT NULL,
        ad_id TEXT NOT NULL,
        advertising_id TEXT NOT NULL,
        country TEXT NOT NULL,
        click_id TEXT NOT NULL,
        mmp TEXT NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS received_requests (
        request_id TEXT PRIMARY KEY,
        test_id TEXT,
        postback_type TEXT,
        event_name TEXT,
        source_id TEXT,
        campaign_id TEXT,
        placement_id TEXT,
        adset_id TEXT,
        ad_id TEXT,
        advertising_id TEXT,
        country TEXT,
        click_id TEXT,
        mmp TEXT,
        gaid TEXT,
        idfa TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS metrics (
        test_id TEXT PRIMARY KEY,
        test_datetime TEXT NOT NULL,
        duration REAL NOT NULL,
        sending_count INTEGER NOT NULL,
        verified_success INTEGER NOT NULL,
        unverified_success INTEGER NOT NULL,
        failed INTEGER NOT NULL,
        verified_rate REAL NOT NULL,
        avg_latency REAL NOT NULL,
        min_latency REAL NOT NULL,
        max_latency REAL NOT NULL,
        p90 REAL NOT NULL,
        p95 REAL NOT NULL,
        p99 REAL NOT NULL,
        rps REAL NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sending_test_request
        ON sending_requests (test_id, request_id)",
    "CREATE INDEX IF NOT EXISTS idx_received_test_request
        ON received_requests (test_id, request_id)",
];

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqlitePostbackStore {
    pool: SqlitePool,
}

impl SqlitePostbackStore {
    /// Open (creating if missing) the database at `database_url` and ensure
    /// the schema exists
    ///
    /// `sqlite::memory:` opens a private in-memory database held by a single
    /// long-lived connection.
    #[instrument]
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let in_memory = database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;

        info!(database_url = %database_url, "SQLite postback store ready");
        Ok(store)
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn invalid_column(field: &str, message: impl Into<String>) -> StoreError {
    StoreError::InvalidData(ValidationError::InvalidFormat {
        field: field.to_string(),
        message: message.into(),
    })
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn sent_from_row(row: &SqliteRow) -> StoreResult<PostbackRecord> {
    Ok(PostbackRecord {
        request_id: RequestId::new(row.try_get::<String, _>("request_id")?)?,
        test_id: TestId::new(row.try_get::<String, _>("test_id")?)?,
        postback_type: row.try_get("postback_type")?,
        event_name: row.try_get("event_name")?,
        source_id: row.try_get("source_id")?,
        campaign_id: row.try_get("campaign_id")?,
        placement_id: row.try_get("placement_id")?,
        adset_id: row.try_get("adset_id")?,
        ad_id: row.try_get("ad_id")?,
        advertising_id: row.try_get("advertising_id")?,
        country: row.try_get("country")?,
        click_id: row.try_get("click_id")?,
        mmp: row.try_get("mmp")?,
    })
}

fn received_from_row(row: &SqliteRow) -> StoreResult<ReceivedPostback> {
    Ok(ReceivedPostback {
        request_id: RequestId::new(row.try_get::<String, _>("request_id")?)?,
        test_id: row.try_get("test_id")?,
        postback_type: row.try_get("postback_type")?,
        event_name: row.try_get("event_name")?,
        source_id: row.try_get("source_id")?,
        campaign_id: row.try_get("campaign_id")?,
        placement_id: row.try_get("placement_id")?,
        adset_id: row.try_get("adset_id")?,
        ad_id: row.try_get("ad_id")?,
        advertising_id: row.try_get("advertising_id")?,
        country: row.try_get("country")?,
        click_id: row.try_get("click_id")?,
        mmp: row.try_get("mmp")?,
        extensions: MmpExtensions {
            gaid: row.try_get("gaid")?,
            idfa: row.try_get("idfa")?,
        },
    })
}

fn summary_from_row(row: &SqliteRow) -> StoreResult<RunSummary> {
    let raw_datetime: String = row.try_get("test_datetime")?;
    let test_datetime = DateTime::parse_from_rfc3339(&raw_datetime)
        .map_err(|e| invalid_column("test_datetime", e.to_string()))?
        .with_timezone(&Utc);

    Ok(RunSummary {
        test_id: TestId::new(row.try_get::<String, _>("test_id")?)?,
        test_datetime,
        duration: row.try_get("duration")?,
        sending_count: count(row.try_get("sending_count")?),
        verified_success: count(row.try_get("verified_success")?),
        unverified_success: count(row.try_get("unverified_success")?),
        failed: count(row.try_get("failed")?),
        metrics: TestMetrics {
            avg_latency: row.try_get("avg_latency")?,
            min_latency: row.try_get("min_latency")?,
            max_latency: row.try_get("max_latency")?,
            p90: row.try_get("p90")?,
            p95: row.try_get("p95")?,
            p99: row.try_get("p99")?,
            verified_rate: row.try_get("verified_rate")?,
            rps: row.try_get("rps")?,
        },
    })
}

#[async_trait]
impl PostbackStore for SqlitePostbackStore {
    #[instrument(skip(self, records), fields(batch_size = records.len()))]
    async fn insert_sent(&self, records: &[PostbackRecord]) -> StoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT OR IGNORE INTO sending_requests ({SENT_COLUMNS}) "));
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.request_id.to_string())
                    .push_bind(record.test_id.to_string())
                    .push_bind(record.postback_type.clone())
                    .push_bind(record.event_name.clone())
                    .push_bind(record.source_id.clone())
                    .push_bind(record.campaign_id.clone())
                    .push_bind(record.placement_id.clone())
                    .push_bind(record.adset_id.clone())
                    .push_bind(record.ad_id.clone())
                    .push_bind(record.advertising_id.clone())
                    .push_bind(record.country.clone())
                    .push_bind(record.click_id.clone())
                    .push_bind(record.mmp.clone());
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(inserted, "Sent batch written");
        Ok(inserted)
    }

    #[instrument(skip(self, records), fields(batch_size = records.len()))]
    async fn insert_received(&self, records: &[ReceivedPostback]) -> StoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT OR IGNORE INTO received_requests ({RECEIVED_COLUMNS}) "
            ));
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.request_id.to_string())
                    .push_bind(record.test_id.clone())
                    .push_bind(record.postback_type.clone())
                    .push_bind(record.event_name.clone())
                    .push_bind(record.source_id.clone())
                    .push_bind(record.campaign_id.clone())
                    .push_bind(record.placement_id.clone())
                    .push_bind(record.adset_id.clone())
                    .push_bind(record.ad_id.clone())
                    .push_bind(record.advertising_id.clone())
                    .push_bind(record.country.clone())
                    .push_bind(record.click_id.clone())
                    .push_bind(record.mmp.clone())
                    .push_bind(record.extensions.gaid.clone())
                    .push_bind(record.extensions.idfa.clone());
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(inserted, "Received batch written");
        Ok(inserted)
    }

    async fn count_sent(&self, test_id: &TestId) -> StoreResult<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sending_requests WHERE test_id = ?")
                .bind(test_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count(total))
    }

    async fn count_delivered(&self, test_id: &TestId) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sending_requests s \
             JOIN received_requests r ON s.request_id = r.request_id \
             WHERE s.test_id = ?",
        )
        .bind(test_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count(total))
    }

    async fn load_sent(&self, test_id: &TestId) -> StoreResult<Vec<PostbackRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SENT_COLUMNS} FROM sending_requests WHERE test_id = ? ORDER BY rowid"
        ))
        .bind(test_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sent_from_row).collect()
    }

    async fn load_received(&self, test_id: &TestId) -> StoreResult<Vec<ReceivedPostback>> {
        let rows = sqlx::query(
            "SELECT r.request_id, r.test_id, r.postback_type, r.event_name, r.source_id, \
             r.campaign_id, r.placement_id, r.adset_id, r.ad_id, r.advertising_id, \
             r.country, r.click_id, r.mmp, r.gaid, r.idfa \
             FROM received_requests r \
             JOIN sending_requests s ON s.request_id = r.request_id \
             WHERE s.test_id = ?",
        )
        .bind(test_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(received_from_row).collect()
    }

    #[instrument(skip(self, summary), fields(test_id = %summary.test_id))]
    async fn save_run_summary(&self, summary: &RunSummary) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO metrics \
             (test_id, test_datetime, duration, sending_count, verified_success, \
              unverified_success, failed, verified_rate, avg_latency, min_latency, \
              max_latency, p90, p95, p99, rps) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(summary.test_id.as_str())
        .bind(summary.test_datetime.to_rfc3339())
        .bind(summary.duration)
        .bind(summary.sending_count as i64)
        .bind(summary.verified_success as i64)
        .bind(summary.unverified_success as i64)
        .bind(summary.failed as i64)
        .bind(summary.metrics.verified_rate)
        .bind(summary.metrics.avg_latency)
        .bind(summary.metrics.min_latency)
        .bind(summary.metrics.max_latency)
        .bind(summary.metrics.p90)
        .bind(summary.metrics.p95)
        .bind(summary.metrics.p99)
        .bind(summary.metrics.rps)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_runs(&self, limit: u32) -> StoreResult<Vec<RunSummary>> {
        let rows = sqlx::query("SELECT * FROM metrics ORDER BY test_datetime DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn latest_test_id(&self) -> StoreResult<Option<TestId>> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT test_id FROM sending_requests ORDER BY rowid DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(latest.map(TestId::new).transpose()?)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "sqlite_store_tests.rs"]
mod tests;
