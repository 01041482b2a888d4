//! Broker 传输协议
//!
//! 接收路由键、序列化字节与元数据并返回成功/失败，不消费任何响应载荷。
//!
use super::BrokerMessage;
use crate::error::DomainResult as Result;
use async_trait::async_trait;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, message: BrokerMessage) -> Result<()>;

    /// 批量发送；默认逐条发送。批量模式下没有逐条确认，仅用于提升吞吐
    async fn send_batch(&self, messages: Vec<BrokerMessage>) -> Result<()> {
        for message in messages {
            self.send(message).await?;
        }
        Ok(())
    }
}
