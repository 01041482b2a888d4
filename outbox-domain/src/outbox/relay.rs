//! Outbox 中继（OutboxRelay）
//!
//! 长驻后台任务，周期性地把 Outbox 中的待投递记录推送到 Broker：
//! - 每个周期拉取一个批次，逐条还原事件并发布，成功则标记已投递，失败则记录重试；
//! - 单条记录失败不影响同批次其他记录，存储故障只放弃当前周期；
//! - 周期之间不重叠，收到取消信号后完成当前记录再退出；
//! - 提供关闭与等待的 `RelayHandle`。
//!
use super::{OutboxRecord, OutboxStore, PublishMode, RelayConfig, RetryState};
use crate::broker::BrokerPublisher;
use crate::domain_event::{DomainEvent, EventEnvelope};
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Builder)]
pub struct OutboxRelay<E>
where
    E: DomainEvent,
{
    store: Arc<dyn OutboxStore>,
    publisher: BrokerPublisher,
    #[builder(default)]
    config: RelayConfig,
    #[builder(skip)]
    _event: PhantomData<fn() -> E>,
}

/// 单个周期的处理结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// 本周期拉取的记录数
    pub fetched: usize,
    /// 发布并成功标记的记录数
    pub delivered: usize,
    /// 发布或还原失败的记录数
    pub failed: usize,
    /// 本周期进入死信状态的记录数
    pub dead_lettered: usize,
}

impl DrainReport {
    /// 因取消而未处理的记录数
    pub fn skipped(&self) -> usize {
        self.fetched
            .saturating_sub(self.delivered + self.failed)
    }
}

impl<E> OutboxRelay<E>
where
    E: DomainEvent,
{
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// 配置自身合法，且重试上限与存储一致
    fn check_config(&self) -> DomainResult<()> {
        self.config.validate()?;

        let store_limit = self.store.max_retries();
        if store_limit != self.config.max_retries {
            return Err(DomainError::InvalidConfig {
                reason: format!(
                    "max_retries mismatch: relay config={}, outbox store={store_limit}",
                    self.config.max_retries
                ),
            });
        }
        Ok(())
    }

    /// 启动中继，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> DomainResult<RelayHandle> {
        self.check_config()?;

        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));

        Ok(RelayHandle {
            token,
            task: Some(task),
        })
    }

    /// 周期循环：首个周期立即执行，此后每隔 `drain_interval` 执行一次，直到取消
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        if let Err(err) = self.check_config() {
            tracing::error!(error = %err, "outbox relay not started");
            return;
        }

        let mut ticker = time::interval(self.config.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.config.drain_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox relay started"
        );

        loop {
            tokio::select! {
                // 取消优先：关闭后不再开始新的周期
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    // 周期在分支内完整执行，取消只在记录之间生效
                    if let Err(err) = self.drain(&token).await {
                        tracing::error!(error = %err, "outbox drain failed, retrying next tick");
                    }
                }
            }
        }

        tracing::info!("outbox relay stopped");
    }

    /// 执行一个周期（不受取消影响），配置不一致或存储拉取失败时返回错误
    pub async fn drain_once(&self) -> DomainResult<DrainReport> {
        self.check_config()?;
        self.drain(&CancellationToken::new()).await
    }

    async fn drain(&self, token: &CancellationToken) -> DomainResult<DrainReport> {
        if token.is_cancelled() {
            return Ok(DrainReport::default());
        }

        let records = self.store.fetch_pending(self.config.batch_size).await?;
        let mut report = DrainReport {
            fetched: records.len(),
            ..Default::default()
        };

        if records.is_empty() {
            return Ok(report);
        }

        match self.config.publish_mode {
            PublishMode::Single => self.deliver_each(&records, token, &mut report).await,
            PublishMode::Batch => self.deliver_batch(&records, token, &mut report).await,
        }

        tracing::debug!(
            fetched = report.fetched,
            delivered = report.delivered,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            "outbox drain finished"
        );
        Ok(report)
    }

    async fn deliver_each(
        &self,
        records: &[OutboxRecord],
        token: &CancellationToken,
        report: &mut DrainReport,
    ) {
        for record in records {
            if token.is_cancelled() {
                tracing::info!(remaining = report.skipped(), "outbox drain interrupted by shutdown");
                break;
            }

            let published = match EventEnvelope::<E>::try_from(record) {
                Ok(envelope) => self.publisher.publish(&envelope).await,
                Err(err) => Err(err),
            };

            match published {
                Ok(()) => self.mark_delivered(record, report).await,
                Err(err) => self.mark_failed(record, &err.to_string(), report).await,
            }
        }
    }

    async fn deliver_batch(
        &self,
        records: &[OutboxRecord],
        token: &CancellationToken,
        report: &mut DrainReport,
    ) {
        let mut decoded: Vec<&OutboxRecord> = Vec::with_capacity(records.len());
        let mut envelopes: Vec<EventEnvelope<E>> = Vec::with_capacity(records.len());

        for record in records {
            match EventEnvelope::<E>::try_from(record) {
                Ok(envelope) => {
                    decoded.push(record);
                    envelopes.push(envelope);
                }
                Err(err) => self.mark_failed(record, &err.to_string(), report).await,
            }
        }

        if envelopes.is_empty() {
            return;
        }

        if token.is_cancelled() {
            tracing::info!(remaining = report.skipped(), "outbox drain interrupted by shutdown");
            return;
        }

        match self.publisher.publish_batch(&envelopes).await {
            Ok(()) => {
                for record in decoded {
                    self.mark_delivered(record, report).await;
                }
            }
            Err(batch_err) => {
                tracing::warn!(
                    error = %batch_err,
                    count = envelopes.len(),
                    "batch publish failed, falling back to single publish"
                );

                for (record, envelope) in decoded.into_iter().zip(&envelopes) {
                    if token.is_cancelled() {
                        tracing::info!(remaining = report.skipped(), "outbox drain interrupted by shutdown");
                        break;
                    }
                    match self.publisher.publish(envelope).await {
                        Ok(()) => self.mark_delivered(record, report).await,
                        Err(err) => self.mark_failed(record, &err.to_string(), report).await,
                    }
                }
            }
        }
    }

    async fn mark_delivered(&self, record: &OutboxRecord, report: &mut DrainReport) {
        match self.store.mark_delivered(record.id()).await {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                // 已发布但未标记：下个周期会再次发布（至少一次语义）
                report.failed += 1;
                tracing::error!(
                    event_id = %record.id(),
                    event_type = record.event_type(),
                    error = %err,
                    "failed to mark outbox record delivered"
                );
            }
        }
    }

    async fn mark_failed(&self, record: &OutboxRecord, reason: &str, report: &mut DrainReport) {
        report.failed += 1;

        match self.store.mark_failed(record.id(), reason).await {
            Ok(RetryState::Retrying { retry_count }) => {
                tracing::warn!(
                    event_id = %record.id(),
                    event_type = record.event_type(),
                    retry_count,
                    error = reason,
                    "outbox delivery failed"
                );
            }
            Ok(RetryState::DeadLettered { retry_count }) => {
                report.dead_lettered += 1;
                tracing::warn!(
                    event_id = %record.id(),
                    event_type = record.event_type(),
                    retry_count,
                    error = reason,
                    "outbox record dead-lettered after exhausting retries"
                );
            }
            Ok(RetryState::AlreadyDelivered) => {
                tracing::debug!(event_id = %record.id(), "failure ignored for delivered record");
            }
            Err(err) => {
                tracing::error!(
                    event_id = %record.id(),
                    error = %err,
                    "failed to record outbox delivery failure"
                );
            }
        }
    }
}

/// 中继运行句柄：用于优雅关闭与等待任务结束
pub struct RelayHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "outbox relay task aborted");
            }
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, BrokerMessage};
    use crate::error::{DomainError, DomainResult};
    use crate::outbox::InMemoryOutboxStore;
    use async_trait::async_trait;
    use outbox_macros::domain_event;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    #[domain_event]
    enum ParcelEvent {
        Shipped { tracking: String },
    }

    /// 记录收到的消息；`batch_fails` 时批量发送失败，`fail_keys` 中的关联 ID 单条发送失败
    #[derive(Default)]
    struct ScriptedBroker {
        sent: Mutex<Vec<BrokerMessage>>,
        batch_calls: AtomicUsize,
        batch_fails: bool,
        fail_ids: Vec<Uuid>,
        cancel_on_send: Option<CancellationToken>,
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn send(&self, message: BrokerMessage) -> DomainResult<()> {
            if let Some(token) = &self.cancel_on_send {
                token.cancel();
            }
            let id: Uuid = message.properties.correlation_id.parse()?;
            if self.fail_ids.contains(&id) {
                return Err(DomainError::broker("connection reset"));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn send_batch(&self, messages: Vec<BrokerMessage>) -> DomainResult<()> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.batch_fails {
                return Err(DomainError::broker("batch rejected"));
            }
            self.sent.lock().unwrap().extend(messages);
            Ok(())
        }
    }

    async fn seeded_store(n: usize) -> (Arc<InMemoryOutboxStore>, Vec<Uuid>) {
        let store = Arc::new(InMemoryOutboxStore::new(5).unwrap());
        let mut ids = Vec::new();
        for i in 0..n {
            let env = EventEnvelope::new(
                "parcel-1",
                ParcelEvent::Shipped {
                    tracking: format!("T{i}"),
                },
            )
            .unwrap();
            ids.push(env.event_id());
            store.append(OutboxRecord::try_from(&env).unwrap()).await.unwrap();
        }
        (store, ids)
    }

    fn relay(
        store: Arc<InMemoryOutboxStore>,
        broker: Arc<ScriptedBroker>,
        publish_mode: PublishMode,
    ) -> OutboxRelay<ParcelEvent> {
        OutboxRelay::builder()
            .store(store)
            .publisher(BrokerPublisher::new(broker))
            .config(RelayConfig {
                drain_interval: Duration::from_millis(20),
                publish_mode,
                ..Default::default()
            })
            .build()
    }

    #[tokio::test]
    async fn one_bad_record_does_not_abort_the_batch() {
        let (store, ids) = seeded_store(3).await;
        let broker = Arc::new(ScriptedBroker {
            fail_ids: vec![ids[1]],
            ..Default::default()
        });

        let report = relay(store.clone(), broker.clone(), PublishMode::Single)
            .drain_once()
            .await
            .unwrap();

        assert_eq!(
            report,
            DrainReport {
                fetched: 3,
                delivered: 2,
                failed: 1,
                dead_lettered: 0
            }
        );
        let failed = store.find(ids[1]).await.unwrap().unwrap();
        assert_eq!(failed.retry_count(), 1);
        assert!(failed.last_error().unwrap().contains("connection reset"));
        assert!(store.find(ids[2]).await.unwrap().unwrap().is_delivered());
    }

    #[tokio::test]
    async fn undecodable_record_is_marked_failed() {
        let (store, _) = seeded_store(1).await;
        let bogus = OutboxRecord::builder()
            .id(Uuid::new_v4())
            .event_type("ParcelEvent.Lost".to_string())
            .aggregate_id("parcel-1".to_string())
            .occurred_at(chrono::Utc::now())
            .serialized_payload(r#"{"Lost":{}}"#.to_string())
            .created_at(chrono::Utc::now())
            .build();
        let bogus_id = bogus.id();
        store.append(bogus).await.unwrap();
        let broker = Arc::new(ScriptedBroker::default());

        let report = relay(store.clone(), broker.clone(), PublishMode::Single)
            .drain_once()
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(broker.sent.lock().unwrap().len(), 1);
        let record = store.find(bogus_id).await.unwrap().unwrap();
        assert_eq!(record.retry_count(), 1);
        assert!(record.last_error().unwrap().contains("serialization error"));
    }

    #[tokio::test]
    async fn batch_mode_sends_once_and_marks_all() {
        let (store, _) = seeded_store(3).await;
        let broker = Arc::new(ScriptedBroker::default());

        let report = relay(store.clone(), broker.clone(), PublishMode::Batch)
            .drain_once()
            .await
            .unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(broker.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_failure_falls_back_to_per_record_bookkeeping() {
        let (store, ids) = seeded_store(3).await;
        let broker = Arc::new(ScriptedBroker {
            batch_fails: true,
            fail_ids: vec![ids[0]],
            ..Default::default()
        });

        let report = relay(store.clone(), broker.clone(), PublishMode::Batch)
            .drain_once()
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(store.find(ids[0]).await.unwrap().unwrap().retry_count(), 1);
        assert_eq!(broker.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_finishes_the_current_record_only() {
        let (store, ids) = seeded_store(3).await;
        let token = CancellationToken::new();
        let broker = Arc::new(ScriptedBroker {
            cancel_on_send: Some(token.clone()),
            ..Default::default()
        });

        let report = relay(store.clone(), broker, PublishMode::Single)
            .drain(&token)
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped(), 2);
        assert!(store.find(ids[0]).await.unwrap().unwrap().is_delivered());
        assert_eq!(store.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_batch_drain_publishes_nothing() {
        let (store, _) = seeded_store(3).await;
        let token = CancellationToken::new();
        token.cancel();
        let broker = Arc::new(ScriptedBroker::default());

        let report = relay(store.clone(), broker.clone(), PublishMode::Batch)
            .drain(&token)
            .await
            .unwrap();

        assert_eq!(report, DrainReport::default());
        assert_eq!(broker.batch_calls.load(Ordering::SeqCst), 0);
        assert!(broker.sent.lock().unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn batch_is_not_published_once_cancelled_after_fetch() {
        let (store, _) = seeded_store(3).await;
        let broker = Arc::new(ScriptedBroker::default());
        let relay = relay(store.clone(), broker.clone(), PublishMode::Batch);
        let records = store.fetch_pending(10).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let mut report = DrainReport {
            fetched: records.len(),
            ..Default::default()
        };
        relay.deliver_batch(&records, &token, &mut report).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.skipped(), 3);
        assert_eq!(broker.batch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.pending_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cancelled_loop_does_not_start_a_cycle() {
        let (store, _) = seeded_store(2).await;
        let broker = Arc::new(ScriptedBroker::default());
        let relay = Arc::new(relay(store.clone(), broker.clone(), PublishMode::Single));
        let token = CancellationToken::new();
        token.cancel();

        relay.run(token).await;

        assert!(broker.sent.lock().unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 2);
    }

    /// 前两次拉取失败的存储，用于验证周期循环不会因存储故障退出
    struct FlakyStore {
        inner: InMemoryOutboxStore,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl OutboxStore for FlakyStore {
        fn max_retries(&self) -> u32 {
            self.inner.max_retries()
        }
        async fn append(&self, record: OutboxRecord) -> DomainResult<()> {
            self.inner.append(record).await
        }
        async fn append_all(&self, records: Vec<OutboxRecord>) -> DomainResult<()> {
            self.inner.append_all(records).await
        }
        async fn fetch_pending(&self, batch_size: usize) -> DomainResult<Vec<OutboxRecord>> {
            if self.fetches.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(DomainError::outbox_store("database is locked"));
            }
            self.inner.fetch_pending(batch_size).await
        }
        async fn mark_delivered(&self, id: Uuid) -> DomainResult<()> {
            self.inner.mark_delivered(id).await
        }
        async fn mark_failed(&self, id: Uuid, error: &str) -> DomainResult<RetryState> {
            self.inner.mark_failed(id, error).await
        }
        async fn pending_count(&self) -> DomainResult<usize> {
            self.inner.pending_count().await
        }
        async fn dead_lettered(&self, limit: usize) -> DomainResult<Vec<OutboxRecord>> {
            self.inner.dead_lettered(limit).await
        }
        async fn dead_lettered_count(&self) -> DomainResult<usize> {
            self.inner.dead_lettered_count().await
        }
        async fn requeue(&self, id: Uuid) -> DomainResult<()> {
            self.inner.requeue(id).await
        }
        async fn find(&self, id: Uuid) -> DomainResult<Option<OutboxRecord>> {
            self.inner.find(id).await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loop_survives_store_errors_and_stops_on_shutdown() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryOutboxStore::new(5).unwrap(),
            fetches: AtomicUsize::new(0),
        });
        let env = EventEnvelope::new(
            "parcel-9",
            ParcelEvent::Shipped {
                tracking: "T9".into(),
            },
        )
        .unwrap();
        store
            .append(OutboxRecord::try_from(&env).unwrap())
            .await
            .unwrap();
        let broker = Arc::new(ScriptedBroker::default());

        let relay: Arc<OutboxRelay<ParcelEvent>> = Arc::new(
            OutboxRelay::builder()
                .store(store.clone())
                .publisher(BrokerPublisher::new(broker.clone()))
                .config(RelayConfig {
                    drain_interval: Duration::from_millis(20),
                    ..Default::default()
                })
                .build(),
        );
        let handle = relay.start().unwrap();

        // 使用 timeout + 条件轮询，减少固定 sleep 的脆弱性
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while store.pending_count().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.shutdown();
        handle.join().await;

        assert!(store.fetches.load(Ordering::SeqCst) >= 3);
        assert!(store.find(env.event_id()).await.unwrap().unwrap().is_delivered());
        assert_eq!(broker.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn start_rejects_invalid_config() {
        let relay: Arc<OutboxRelay<ParcelEvent>> = Arc::new(
            OutboxRelay::builder()
                .store(Arc::new(InMemoryOutboxStore::new(5).unwrap()))
                .publisher(BrokerPublisher::new(Arc::new(ScriptedBroker::default())))
                .config(RelayConfig {
                    batch_size: 0,
                    ..Default::default()
                })
                .build(),
        );
        assert!(matches!(
            relay.start().err(),
            Some(DomainError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn retry_limit_must_match_the_store() {
        let store = Arc::new(InMemoryOutboxStore::new(3).unwrap());
        let broker = Arc::new(ScriptedBroker::default());
        let relay: Arc<OutboxRelay<ParcelEvent>> = Arc::new(
            OutboxRelay::builder()
                .store(store)
                .publisher(BrokerPublisher::new(broker))
                .config(RelayConfig {
                    max_retries: 5,
                    ..Default::default()
                })
                .build(),
        );

        assert!(matches!(
            relay.drain_once().await,
            Err(DomainError::InvalidConfig { .. })
        ));
        assert!(matches!(
            relay.start().err(),
            Some(DomainError::InvalidConfig { .. })
        ));
    }
}
