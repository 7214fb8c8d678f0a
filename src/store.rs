//! Durable results: verified proxies and productive ranges
//!
//! The pool is capped at one connection, so every write goes through a
//! single writer even under concurrent verification completions.

use crate::scan::models::{Anonymity, ProxyRecord, RangeRecord};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Weight of a new observation in the range hit-rate moving average.
const RANGE_HIT_SMOOTHING: f64 = 0.25;

#[derive(Clone)]
pub struct ResultStore {
    pool: SqlitePool,
}

impl ResultStore {
    /// Open the database at `path`, creating it and the schema if missing.
    /// Callers treat a failure here as fatal; per-record write failures later
    /// are not.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS proxies(
            ip TEXT NOT NULL,
            port INTEGER NOT NULL,
            country TEXT NOT NULL,
            city TEXT NOT NULL,
            speed INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            anonymity TEXT NOT NULL,
            isp TEXT NOT NULL,
            last_checked TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (ip, port)
        )"#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS ip_ranges(
            cidr TEXT PRIMARY KEY,
            last_scan TEXT NOT NULL,
            hit_rate REAL NOT NULL
        )"#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_proxies_active ON proxies(is_active)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Insert or refresh one verified proxy, keyed by (ip, port). Re-checking
    /// an existing proxy replaces its attributes in place.
    pub async fn upsert_proxy(&self, record: &ProxyRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO proxies(ip, port, country, city, speed, protocol, anonymity, isp, last_checked, is_active)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(ip, port) DO UPDATE SET
                country = excluded.country,
                city = excluded.city,
                speed = excluded.speed,
                protocol = excluded.protocol,
                anonymity = excluded.anonymity,
                isp = excluded.isp,
                last_checked = excluded.last_checked,
                is_active = excluded.is_active
        "#,
        )
        .bind(&record.ip)
        .bind(record.port as i64)
        .bind(&record.country)
        .bind(&record.city)
        .bind(record.speed as i64)
        .bind(&record.protocol)
        .bind(record.anonymity.to_string())
        .bind(&record.isp)
        .bind(record.last_checked)
        .bind(record.active as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fold one observed success fraction into the range's hit-rate and
    /// refresh its scan time. The first observation seeds the record; later
    /// ones blend in as an exponential moving average, keeping the rate in
    /// [0, 1].
    pub async fn upsert_range_hit(&self, cidr: &str, observed: f64) -> Result<()> {
        let observed = observed.clamp(0.0, 1.0);
        sqlx::query(
            r#"INSERT INTO ip_ranges(cidr, last_scan, hit_rate) VALUES(?1, ?2, ?3)
            ON CONFLICT(cidr) DO UPDATE SET
                last_scan = excluded.last_scan,
                hit_rate = ip_ranges.hit_rate * ?4 + excluded.hit_rate * ?5
        "#,
        )
        .bind(cidr)
        .bind(Utc::now())
        .bind(observed)
        .bind(1.0 - RANGE_HIT_SMOOTHING)
        .bind(RANGE_HIT_SMOOTHING)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fastest active proxies first.
    pub async fn top_active(&self, limit: i64) -> Result<Vec<ProxyRecord>> {
        let rows = sqlx::query_as::<_, ProxyRow>(
            "SELECT ip, port, country, city, speed, protocol, anonymity, isp, last_checked, is_active
             FROM proxies WHERE is_active = 1 ORDER BY speed ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ProxyRecord::from).collect())
    }

    pub async fn active_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxies WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Most productive ranges first; the target generator's feedback source.
    pub async fn working_ranges(&self, limit: i64) -> Result<Vec<RangeRecord>> {
        let rows = sqlx::query_as::<_, RangeRecord>(
            "SELECT cidr, last_scan, hit_rate FROM ip_ranges
             ORDER BY hit_rate DESC, last_scan DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Raw row shape; `ProxyRecord` is the domain view.
#[derive(sqlx::FromRow)]
struct ProxyRow {
    ip: String,
    port: i64,
    country: String,
    city: String,
    speed: i64,
    protocol: String,
    anonymity: String,
    isp: String,
    last_checked: DateTime<Utc>,
    is_active: i64,
}

impl From<ProxyRow> for ProxyRecord {
    fn from(row: ProxyRow) -> Self {
        Self {
            ip: row.ip,
            port: row.port as u16,
            country: row.country,
            city: row.city,
            speed: row.speed as u32,
            protocol: row.protocol,
            anonymity: Anonymity::from_label(&row.anonymity),
            isp: row.isp,
            last_checked: row.last_checked,
            active: row.is_active != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::models::{Task, Verification};
    use std::net::Ipv4Addr;

    async fn store() -> ResultStore {
        ResultStore::open(":memory:").await.unwrap()
    }

    fn record(speed: u32, anonymity: Anonymity) -> ProxyRecord {
        ProxyRecord::verified(
            Task::new(Ipv4Addr::new(203, 0, 113, 7), 8080),
            Verification {
                latency_ms: speed,
                anonymity,
            },
        )
    }

    #[tokio::test]
    async fn test_double_upsert_keeps_one_row_with_the_latest_attributes() {
        let store = store().await;
        store
            .upsert_proxy(&record(900, Anonymity::Transparent))
            .await
            .unwrap();
        store
            .upsert_proxy(&record(350, Anonymity::Elite))
            .await
            .unwrap();

        assert_eq!(store.active_count().await.unwrap(), 1);
        let top = store.top_active(10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].speed, 350);
        assert_eq!(top[0].anonymity, Anonymity::Elite);
        assert_eq!(top[0].endpoint(), "203.0.113.7:8080");
    }

    #[tokio::test]
    async fn test_top_active_orders_by_speed_ascending() {
        let store = store().await;
        for (last_octet, speed) in [(1u8, 800u32), (2, 120), (3, 450)] {
            let task = Task::new(Ipv4Addr::new(203, 0, 113, last_octet), 80);
            let record = ProxyRecord::verified(
                task,
                Verification {
                    latency_ms: speed,
                    anonymity: Anonymity::Unknown,
                },
            );
            store.upsert_proxy(&record).await.unwrap();
        }
        let top = store.top_active(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].speed, 120);
        assert_eq!(top[1].speed, 450);
    }

    #[tokio::test]
    async fn test_range_hit_rate_seeds_then_averages() {
        let store = store().await;
        store.upsert_range_hit("203.0.113.0/24", 1.0).await.unwrap();
        let ranges = store.working_ranges(10).await.unwrap();
        assert_eq!(ranges.len(), 1);
        assert!((ranges[0].hit_rate - 1.0).abs() < 1e-9);

        store.upsert_range_hit("203.0.113.0/24", 0.0).await.unwrap();
        let ranges = store.working_ranges(10).await.unwrap();
        assert!((ranges[0].hit_rate - 0.75).abs() < 1e-9);

        store.upsert_range_hit("203.0.113.0/24", 0.0).await.unwrap();
        let ranges = store.working_ranges(10).await.unwrap();
        assert!((ranges[0].hit_rate - 0.5625).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_range_hit_rate_input_is_clamped() {
        let store = store().await;
        store.upsert_range_hit("198.51.100.0/24", 7.5).await.unwrap();
        let ranges = store.working_ranges(10).await.unwrap();
        assert!((ranges[0].hit_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_working_ranges_orders_by_hit_rate() {
        let store = store().await;
        store.upsert_range_hit("203.0.113.0/24", 0.2).await.unwrap();
        store.upsert_range_hit("198.51.100.0/24", 0.9).await.unwrap();
        let ranges = store.working_ranges(10).await.unwrap();
        assert_eq!(ranges[0].cidr, "198.51.100.0/24");
        assert_eq!(ranges[1].cidr, "203.0.113.0/24");
    }
}
