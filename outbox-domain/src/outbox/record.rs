//! Outbox 记录（OutboxRecord）
//!
//! 定义事件在 Outbox 中等待外部投递的持久形态、投递状态，
//! 以及与 `EventEnvelope` 之间的转换。
//!
use crate::domain_event::{DomainEvent, EventEnvelope};
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// 记录 ID，等于事件 ID
    id: Uuid,
    /// 事件类型
    event_type: String,
    /// 产生事件的聚合 ID
    aggregate_id: String,
    /// 事件发生时间
    occurred_at: DateTime<Utc>,
    /// 序列化后的事件载荷（JSON 文本）
    serialized_payload: String,
    /// 进入 Outbox 的时间，决定拉取顺序
    created_at: DateTime<Utc>,
    // 投递状态只能由存储迁移或恢复，构建器总是产出待投递记录
    #[builder(skip)]
    is_delivered: bool,
    /// 首次投递成功的时间，只设置一次
    #[builder(skip)]
    delivered_at: Option<DateTime<Utc>>,
    /// 失败投递次数
    #[builder(skip)]
    retry_count: u32,
    /// 最近一次失败原因
    #[builder(skip)]
    last_error: Option<String>,
    /// 重试耗尽、进入死信状态的时间
    #[builder(skip)]
    dead_lettered_at: Option<DateTime<Utc>>,
}

/// 持久化的投递状态，用于从存储行恢复记录
#[cfg_attr(not(feature = "infra-sqlx"), allow(dead_code))]
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DeliveryState {
    pub(crate) delivered_at: Option<DateTime<Utc>>,
    pub(crate) retry_count: u32,
    pub(crate) last_error: Option<String>,
    pub(crate) dead_lettered_at: Option<DateTime<Utc>>,
}

/// `mark_failed` 之后记录所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// 仍可在后续周期重试
    Retrying { retry_count: u32 },
    /// 已达到重试上限，不再被拉取
    DeadLettered { retry_count: u32 },
    /// 记录已投递，失败标记被忽略
    AlreadyDelivered,
}

impl RetryState {
    pub fn is_dead_lettered(&self) -> bool {
        matches!(self, Self::DeadLettered { .. })
    }
}

impl OutboxRecord {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn serialized_payload(&self) -> &str {
        &self.serialized_payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_delivered(&self) -> bool {
        self.is_delivered
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn dead_lettered_at(&self) -> Option<DateTime<Utc>> {
        self.dead_lettered_at
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.dead_lettered_at.is_some()
    }

    /// 是否可以参与投递尝试
    pub fn is_pending(&self, max_retries: u32) -> bool {
        !self.is_delivered && self.retry_count < max_retries
    }

    /// 恢复存储中的投递状态；`delivered_at` 决定是否已投递
    #[cfg_attr(not(feature = "infra-sqlx"), allow(dead_code))]
    pub(crate) fn with_state(mut self, is_delivered: bool, state: DeliveryState) -> DomainResult<Self> {
        if is_delivered != state.delivered_at.is_some() {
            return Err(DomainError::Parse {
                reason: format!(
                    "outbox record {}: is_delivered={is_delivered} disagrees with delivered_at",
                    self.id
                ),
            });
        }
        self.is_delivered = is_delivered;
        self.delivered_at = state.delivered_at;
        self.retry_count = state.retry_count;
        self.last_error = state.last_error;
        self.dead_lettered_at = state.dead_lettered_at;
        Ok(self)
    }

    /// 幂等：已投递的记录保持原有 `delivered_at`
    pub(crate) fn record_delivery(&mut self, now: DateTime<Utc>) {
        if self.is_delivered {
            return;
        }
        self.is_delivered = true;
        self.delivered_at = Some(now);
    }

    pub(crate) fn record_failure(
        &mut self,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> RetryState {
        if self.is_delivered {
            return RetryState::AlreadyDelivered;
        }

        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.to_string());

        if self.retry_count >= max_retries {
            self.dead_lettered_at.get_or_insert(now);
            RetryState::DeadLettered {
                retry_count: self.retry_count,
            }
        } else {
            RetryState::Retrying {
                retry_count: self.retry_count,
            }
        }
    }

    pub(crate) fn requeue(&mut self) {
        if self.is_delivered {
            return;
        }
        self.retry_count = 0;
        self.last_error = None;
        self.dead_lettered_at = None;
    }
}

impl<E> TryFrom<&EventEnvelope<E>> for OutboxRecord
where
    E: DomainEvent,
{
    type Error = serde_json::Error;

    fn try_from(envelope: &EventEnvelope<E>) -> Result<Self, Self::Error> {
        Ok(OutboxRecord {
            id: envelope.event_id(),
            event_type: envelope.event_type().to_string(),
            aggregate_id: envelope.aggregate_id().to_string(),
            occurred_at: envelope.occurred_at(),
            serialized_payload: serde_json::to_string(envelope.payload())?,
            created_at: Utc::now(),
            is_delivered: false,
            delivered_at: None,
            retry_count: 0,
            last_error: None,
            dead_lettered_at: None,
        })
    }
}

impl<E> TryFrom<&OutboxRecord> for EventEnvelope<E>
where
    E: DomainEvent,
{
    type Error = DomainError;

    fn try_from(record: &OutboxRecord) -> Result<Self, Self::Error> {
        let payload: E = serde_json::from_str(&record.serialized_payload)?;

        EventEnvelope::rehydrate(
            record.id,
            &record.event_type,
            record.occurred_at,
            record.aggregate_id.clone(),
            payload,
        )
    }
}

/// 将一组事件转换为 Outbox 记录，供业务事务内一并写入
pub fn serialize_records<E>(envelopes: &[EventEnvelope<E>]) -> DomainResult<Vec<OutboxRecord>>
where
    E: DomainEvent,
{
    let records = envelopes
        .iter()
        .map(OutboxRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}
