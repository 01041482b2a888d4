//! 内存版 Broker（InMemoryBroker）
//!
//! 基于 `tokio::sync::broadcast` 实现的轻量 Broker，满足 `Broker` 协议：
//! - `send`：克隆并广播消息；
//! - `subscribe`：返回 `'static` 生命周期消息流，便于在 `tokio::spawn` 中使用；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：若无订阅者，发送的消息将被丢弃（仍视为发送成功）。

use crate::broker::{Broker, BrokerMessage};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// 简单的内存 Broker 实现
#[derive(Clone)]
pub struct InMemoryBroker {
    tx: broadcast::Sender<BrokerMessage>,
}

impl InMemoryBroker {
    /// 创建一个内存 Broker，`capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 订阅全部消息；订阅前发送的消息不可见，滞后的订阅者会收到 `Broker` 错误
    pub fn subscribe(&self) -> BoxStream<'static, Result<BrokerMessage>> {
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx).map(|r| r.map_err(|e| DomainError::broker(e.to_string())));
        Box::pin(stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(&self, message: BrokerMessage) -> Result<()> {
        // 若当前无订阅者，broadcast 的 send 会返回错误，这里视为非致命并忽略
        let _ = self.tx.send(message);
        Ok(())
    }
}
