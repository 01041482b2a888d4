use super::DomainEvent;
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 事件信封：事件载荷及其标识、类型、发生时间与所属聚合
///
/// 构造后不可变，字段只通过只读访问器暴露。载荷在进程内保持结构化，
/// 仅在 Outbox/Broker 边界才被序列化。
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope<E>
where
    E: DomainEvent,
{
    event_id: Uuid,
    event_type: String,
    occurred_at: DateTime<Utc>,
    aggregate_id: String,
    payload: E,
}

impl<E> EventEnvelope<E>
where
    E: DomainEvent,
{
    /// 创建新事件：分配全局唯一 ID，记录发生时间，并校验载荷
    pub fn new(aggregate_id: impl Into<String>, payload: E) -> DomainResult<Self> {
        payload.validate()?;

        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: payload.event_type().to_string(),
            occurred_at: Utc::now(),
            aggregate_id: aggregate_id.into(),
            payload,
        })
    }

    /// 由持久化形态还原信封，校验载荷类型与记录的事件类型一致
    pub(crate) fn rehydrate(
        event_id: Uuid,
        event_type: &str,
        occurred_at: DateTime<Utc>,
        aggregate_id: String,
        payload: E,
    ) -> DomainResult<Self> {
        if payload.event_type() != event_type {
            return Err(DomainError::TypeMismatch {
                expected: event_type.to_string(),
                found: payload.event_type().to_string(),
            });
        }
        payload.validate()?;

        Ok(Self {
            event_id,
            event_type: event_type.to_string(),
            occurred_at,
            aggregate_id,
            payload,
        })
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn event_version(&self) -> usize {
        self.payload.event_version()
    }
}
