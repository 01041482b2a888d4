//! 事件发布器（BrokerPublisher）
//!
//! 把事件信封转换为 `BrokerMessage` 并交给 `Broker`：
//! - 载荷序列化为 JSON；
//! - 路由键由事件类型归一化得到（见 [`routing_key`]）；
//! - 标记持久投递，附加每次尝试唯一的消息 ID、时间戳，以及等于事件 ID 的关联 ID。
//!
use super::{Broker, BrokerMessage, MessageProperties};
use crate::domain_event::{DomainEvent, EventEnvelope};
use crate::error::DomainResult as Result;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const HEADER_AGGREGATE_ID: &str = "aggregate_id";
pub const HEADER_EVENT_VERSION: &str = "event_version";
pub const HEADER_OCCURRED_AT: &str = "occurred_at";

#[derive(Clone)]
pub struct BrokerPublisher {
    broker: Arc<dyn Broker>,
}

impl BrokerPublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// 发布单个事件；传输失败以 `DomainError::Broker` 返回
    pub async fn publish<E>(&self, envelope: &EventEnvelope<E>) -> Result<()>
    where
        E: DomainEvent,
    {
        let message = Self::build_message(envelope)?;
        let message_id = message.properties.message_id;

        self.broker.send(message).await?;

        tracing::debug!(
            event_id = %envelope.event_id(),
            event_type = envelope.event_type(),
            %message_id,
            "event published"
        );
        Ok(())
    }

    /// 批量发布：逐条构造消息，一次传输调用发送；没有逐条确认
    pub async fn publish_batch<E>(&self, envelopes: &[EventEnvelope<E>]) -> Result<()>
    where
        E: DomainEvent,
    {
        if envelopes.is_empty() {
            return Ok(());
        }

        let messages = envelopes
            .iter()
            .map(Self::build_message)
            .collect::<Result<Vec<_>>>()?;

        self.broker.send_batch(messages).await?;

        tracing::debug!(count = envelopes.len(), "event batch published");
        Ok(())
    }

    pub fn build_message<E>(envelope: &EventEnvelope<E>) -> Result<BrokerMessage>
    where
        E: DomainEvent,
    {
        let body = serde_json::to_vec(envelope.payload())?;

        let mut headers = BTreeMap::new();
        headers.insert(
            HEADER_AGGREGATE_ID.to_string(),
            envelope.aggregate_id().to_string(),
        );
        headers.insert(
            HEADER_EVENT_VERSION.to_string(),
            envelope.event_version().to_string(),
        );
        headers.insert(
            HEADER_OCCURRED_AT.to_string(),
            envelope
                .occurred_at()
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        );

        Ok(BrokerMessage {
            routing_key: routing_key(envelope.event_type()),
            body,
            properties: MessageProperties {
                persistent: true,
                message_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                correlation_id: envelope.event_id().to_string(),
                type_name: envelope.event_type().to_string(),
                content_type: CONTENT_TYPE_JSON.to_string(),
                headers,
            },
        })
    }
}

/// 由事件类型推导路由键
///
/// 按 `.` 分段，去掉每段末尾的 `Event`（帕斯卡命名）或 `_event`/`-event` 后缀，
/// 再转为小写：`OrderPlacedEvent` -> `orderplaced`，`OrderEvent.Placed` -> `order.placed`。
/// 整段恰为后缀本身时保留。
pub fn routing_key(event_type: &str) -> String {
    event_type
        .split('.')
        .map(normalize_segment)
        .collect::<Vec<_>>()
        .join(".")
}

fn normalize_segment(segment: &str) -> String {
    // 先剥离带分隔符的后缀，避免残留分隔符
    let stripped = strip_suffix_ignore_case(segment, "_event")
        .or_else(|| strip_suffix_ignore_case(segment, "-event"))
        .or_else(|| segment.strip_suffix("Event"))
        .filter(|s| !s.is_empty())
        .unwrap_or(segment);

    stripped.to_lowercase()
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    if !s.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = s.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}
