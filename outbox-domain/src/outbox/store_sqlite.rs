//! SQLite 版 Outbox 存储（SqliteOutboxStore）
//!
//! 记录保存在 `outbox_records` 表中。时间统一写为定长 RFC 3339（微秒、`Z` 结尾）文本，
//! 使字典序与时间顺序一致；创建时间相同的记录以 `rowid`（插入顺序）决胜。
//!
//! 业务写入与 Outbox 写入共用同一事务时使用 [`SqliteOutboxStore::append_in_tx`]。
//!
use super::record::DeliveryState;
use super::store::ensure_max_retries;
use super::{OutboxRecord, OutboxStore, RetryState};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, event_type, aggregate_id, occurred_at, serialized_payload, \
     created_at, is_delivered, delivered_at, retry_count, last_error, dead_lettered_at";

#[derive(Clone)]
pub struct SqliteOutboxStore {
    pool: SqlitePool,
    max_retries: u32,
}

impl SqliteOutboxStore {
    /// 创建存储并确保表与索引存在；`max_retries` 为 0 时返回 `InvalidConfig`
    pub async fn new(pool: SqlitePool, max_retries: u32) -> Result<Self> {
        ensure_max_retries(max_retries)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_records (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                aggregate_id TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                serialized_payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                is_delivered INTEGER NOT NULL DEFAULT 0,
                delivered_at TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                dead_lettered_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON outbox_records(is_delivered, retry_count, created_at)
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, max_retries })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 在调用方的事务中写入记录；随事务一起提交或回滚
    pub async fn append_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        records: &[OutboxRecord],
    ) -> Result<()> {
        for record in records {
            insert(&mut **tx, record).await?;
        }
        tracing::debug!(count = records.len(), "outbox records staged in transaction");
        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT is_delivered FROM outbox_records WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

async fn insert(conn: &mut SqliteConnection, record: &OutboxRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox_records
        (id, event_type, aggregate_id, occurred_at, serialized_payload, created_at,
         is_delivered, delivered_at, retry_count, last_error, dead_lettered_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id().to_string())
    .bind(record.event_type())
    .bind(record.aggregate_id())
    .bind(timestamp(record.occurred_at()))
    .bind(record.serialized_payload())
    .bind(timestamp(record.created_at()))
    .bind(record.is_delivered())
    .bind(record.delivered_at().map(timestamp))
    .bind(i64::from(record.retry_count()))
    .bind(record.last_error())
    .bind(record.dead_lettered_at().map(timestamp))
    .execute(conn)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DomainError::DuplicateEvent {
            event_id: record.id().to_string(),
        },
        other => other.into(),
    })?;

    Ok(())
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn not_found(id: Uuid) -> DomainError {
    DomainError::not_found(format!("outbox record {id}"))
}

fn row_to_record(row: &SqliteRow) -> Result<OutboxRecord> {
    let id: String = row.try_get("id")?;
    let occurred_at: String = row.try_get("occurred_at")?;
    let created_at: String = row.try_get("created_at")?;
    let delivered_at: Option<String> = row.try_get("delivered_at")?;
    let dead_lettered_at: Option<String> = row.try_get("dead_lettered_at")?;
    let retry_count: i64 = row.try_get("retry_count")?;

    let record = OutboxRecord::builder()
        .id(Uuid::parse_str(&id)?)
        .event_type(row.try_get("event_type")?)
        .aggregate_id(row.try_get("aggregate_id")?)
        .occurred_at(parse_timestamp(&occurred_at)?)
        .serialized_payload(row.try_get("serialized_payload")?)
        .created_at(parse_timestamp(&created_at)?)
        .build();

    record.with_state(
        row.try_get("is_delivered")?,
        DeliveryState {
            delivered_at: delivered_at.as_deref().map(parse_timestamp).transpose()?,
            retry_count: u32::try_from(retry_count).map_err(|_| DomainError::Parse {
                reason: format!("retry_count out of range: {retry_count}"),
            })?,
            last_error: row.try_get("last_error")?,
            dead_lettered_at: dead_lettered_at.as_deref().map(parse_timestamp).transpose()?,
        },
    )
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn append(&self, record: OutboxRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, &record).await
    }

    async fn append_all(&self, records: Vec<OutboxRecord>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.append_in_tx(&mut tx, &records).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_pending(&self, batch_size: usize) -> Result<Vec<OutboxRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_records \
             WHERE is_delivered = 0 AND retry_count < ? \
             ORDER BY created_at ASC, rowid ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(self.max_retries))
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET is_delivered = 1, delivered_at = COALESCE(delivered_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<RetryState> {
        // SET 中的列引用取更新前的值
        let retry_count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE outbox_records
            SET retry_count = retry_count + 1,
                last_error = ?,
                dead_lettered_at = CASE
                    WHEN retry_count + 1 >= ? THEN COALESCE(dead_lettered_at, ?)
                    ELSE dead_lettered_at
                END
            WHERE id = ? AND is_delivered = 0
            RETURNING retry_count
            "#,
        )
        .bind(error)
        .bind(i64::from(self.max_retries))
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match retry_count {
            Some(n) => {
                let retry_count = u32::try_from(n).unwrap_or(u32::MAX);
                if retry_count >= self.max_retries {
                    Ok(RetryState::DeadLettered { retry_count })
                } else {
                    Ok(RetryState::Retrying { retry_count })
                }
            }
            None if self.exists(id).await? => Ok(RetryState::AlreadyDelivered),
            None => Err(not_found(id)),
        }
    }

    async fn pending_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_records WHERE is_delivered = 0 AND retry_count < ?",
        )
        .bind(i64::from(self.max_retries))
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn dead_lettered(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_records \
             WHERE is_delivered = 0 AND dead_lettered_at IS NOT NULL \
             ORDER BY dead_lettered_at ASC, rowid ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn dead_lettered_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_records \
             WHERE is_delivered = 0 AND dead_lettered_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn requeue(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET retry_count = 0, last_error = NULL, dead_lettered_at = NULL
            WHERE id = ? AND is_delivered = 0
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        // 已投递的记录不受影响
        if result.rows_affected() == 0 && !self.exists(id).await? {
            return Err(not_found(id));
        }
        tracing::info!(%id, "outbox record requeued");
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<OutboxRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM outbox_records WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }
}
