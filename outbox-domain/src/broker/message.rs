use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 发往 Broker 的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// 路由键，由事件类型归一化得到
    pub routing_key: String,
    /// 序列化后的事件载荷（JSON）
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

/// 消息属性：持久化标志与追踪元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// 持久投递
    pub persistent: bool,
    /// 每次投递尝试唯一
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// 等于事件 ID，跨重试保持不变，下游据此去重或追踪
    pub correlation_id: String,
    /// 声明的事件类型名
    pub type_name: String,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
}

impl BrokerMessage {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.properties.headers.get(key).map(String::as_str)
    }
}
