//! 内存版 Outbox 存储（InMemoryOutboxStore）
//!
//! 以插入顺序保存记录，单把异步互斥锁保证逐条读改写的原子性，
//! `append` 可与中继的读取安全交错。适用于测试、示例与单进程场景。
//!
use super::store::ensure_max_retries;
use super::{OutboxRecord, OutboxStore, RetryState};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct InMemoryOutboxStore {
    max_retries: u32,
    records: Mutex<Vec<OutboxRecord>>,
}

impl InMemoryOutboxStore {
    /// `max_retries` 为 0 时返回 `InvalidConfig`
    pub fn new(max_retries: u32) -> Result<Self> {
        ensure_max_retries(max_retries)?;
        Ok(Self {
            max_retries,
            records: Mutex::new(Vec::new()),
        })
    }

    /// 全部记录的快照（含已投递与死信），按插入顺序
    pub async fn snapshot(&self) -> Vec<OutboxRecord> {
        self.records.lock().await.clone()
    }
}

fn not_found(id: Uuid) -> DomainError {
    DomainError::not_found(format!("outbox record {id}"))
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn append(&self, record: OutboxRecord) -> Result<()> {
        self.append_all(vec![record]).await
    }

    async fn append_all(&self, records: Vec<OutboxRecord>) -> Result<()> {
        let mut guard = self.records.lock().await;

        // 先整体校验再写入，保证全有或全无
        let mut ids: HashSet<Uuid> = guard.iter().map(OutboxRecord::id).collect();
        for record in &records {
            if !ids.insert(record.id()) {
                return Err(DomainError::DuplicateEvent {
                    event_id: record.id().to_string(),
                });
            }
        }

        tracing::debug!(count = records.len(), "outbox records appended");
        guard.extend(records);
        Ok(())
    }

    async fn fetch_pending(&self, batch_size: usize) -> Result<Vec<OutboxRecord>> {
        let guard = self.records.lock().await;

        let mut pending: Vec<&OutboxRecord> = guard
            .iter()
            .filter(|r| r.is_pending(self.max_retries))
            .collect();
        // 稳定排序：创建时间相同则保持插入顺序
        pending.sort_by_key(|r| r.created_at());

        Ok(pending.into_iter().take(batch_size).cloned().collect())
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        let mut guard = self.records.lock().await;
        let record = guard
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| not_found(id))?;

        record.record_delivery(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<RetryState> {
        let mut guard = self.records.lock().await;
        let record = guard
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| not_found(id))?;

        Ok(record.record_failure(error, self.max_retries, Utc::now()))
    }

    async fn pending_count(&self) -> Result<usize> {
        let guard = self.records.lock().await;
        Ok(guard
            .iter()
            .filter(|r| r.is_pending(self.max_retries))
            .count())
    }

    async fn dead_lettered(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let guard = self.records.lock().await;

        let mut dead: Vec<&OutboxRecord> = guard
            .iter()
            .filter(|r| !r.is_delivered() && r.is_dead_lettered())
            .collect();
        dead.sort_by_key(|r| r.dead_lettered_at());

        Ok(dead.into_iter().take(limit).cloned().collect())
    }

    async fn dead_lettered_count(&self) -> Result<usize> {
        let guard = self.records.lock().await;
        Ok(guard
            .iter()
            .filter(|r| !r.is_delivered() && r.is_dead_lettered())
            .count())
    }

    async fn requeue(&self, id: Uuid) -> Result<()> {
        let mut guard = self.records.lock().await;
        let record = guard
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| not_found(id))?;

        record.requeue();
        tracing::info!(%id, "outbox record requeued");
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<OutboxRecord>> {
        let guard = self.records.lock().await;
        Ok(guard.iter().find(|r| r.id() == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn record_at(created_at: DateTime<Utc>) -> OutboxRecord {
        OutboxRecord::builder()
            .id(Uuid::new_v4())
            .event_type("OrderEvent.Placed".to_string())
            .aggregate_id("order-1".to_string())
            .occurred_at(created_at)
            .serialized_payload(r#"{"Placed":{}}"#.to_string())
            .created_at(created_at)
            .build()
    }

    #[tokio::test]
    async fn fetch_pending_returns_oldest_first() {
        let store = InMemoryOutboxStore::new(5).unwrap();
        let t1 = Utc::now();
        let (r1, r2, r3) = (
            record_at(t1),
            record_at(t1 + Duration::seconds(1)),
            record_at(t1 + Duration::seconds(2)),
        );
        // 乱序写入
        store.append(r3.clone()).await.unwrap();
        store.append(r1.clone()).await.unwrap();
        store.append(r2.clone()).await.unwrap();

        let batch = store.fetch_pending(2).await.unwrap();
        let ids: Vec<Uuid> = batch.iter().map(OutboxRecord::id).collect();
        assert_eq!(ids, vec![r1.id(), r2.id()]);
        assert_eq!(store.pending_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn mark_delivered_is_idempotent() {
        let store = InMemoryOutboxStore::new(5).unwrap();
        let record = record_at(Utc::now());
        let id = record.id();
        store.append(record).await.unwrap();

        store.mark_delivered(id).await.unwrap();
        let first = store.find(id).await.unwrap().unwrap().delivered_at();
        store.mark_delivered(id).await.unwrap();
        let second = store.find(id).await.unwrap().unwrap().delivered_at();

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_records_leave_the_pending_set() {
        let store = InMemoryOutboxStore::new(2).unwrap();
        let record = record_at(Utc::now());
        let id = record.id();
        store.append(record).await.unwrap();

        assert_eq!(
            store.mark_failed(id, "broker down").await.unwrap(),
            RetryState::Retrying { retry_count: 1 }
        );
        assert_eq!(store.fetch_pending(10).await.unwrap().len(), 1);
        assert!(store.mark_failed(id, "broker down").await.unwrap().is_dead_lettered());

        assert!(store.fetch_pending(10).await.unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.dead_lettered_count().await.unwrap(), 1);
        let dead = store.dead_lettered(10).await.unwrap();
        assert_eq!(dead[0].last_error(), Some("broker down"));
        assert!(!dead[0].is_delivered());

        store.requeue(id).await.unwrap();
        assert_eq!(store.fetch_pending(10).await.unwrap().len(), 1);
        assert_eq!(store.dead_lettered_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_atomically() {
        let store = InMemoryOutboxStore::new(5).unwrap();
        let existing = record_at(Utc::now());
        store.append(existing.clone()).await.unwrap();

        let fresh = record_at(Utc::now());
        let err = store
            .append_all(vec![fresh.clone(), existing.clone()])
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::DuplicateEvent { .. }));
        assert!(store.find(fresh.id()).await.unwrap().is_none());
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[test]
    fn zero_retry_limit_is_rejected() {
        assert!(matches!(
            InMemoryOutboxStore::new(0),
            Err(DomainError::InvalidConfig { .. })
        ));
        assert_eq!(InMemoryOutboxStore::new(1).unwrap().max_retries(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryOutboxStore::new(5).unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.mark_delivered(id).await,
            Err(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            store.mark_failed(id, "x").await,
            Err(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            store.requeue(id).await,
            Err(DomainError::NotFound { .. })
        ));
    }
}
