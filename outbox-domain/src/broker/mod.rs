//! Broker 投递（broker）
//!
//! 负责把进程内的事件信封转换为消息总线上的持久消息：
//! - `Broker`：外部消息中间件的传输边界（发送单条/批量消息）；
//! - `BrokerMessage`：路由键、序列化载荷与持久化/追踪元数据；
//! - `BrokerPublisher`：序列化载荷、推导路由键、附加消息 ID 与关联 ID；
//! - `InMemoryBroker`：基于 broadcast 的内存实现，用于测试与本地开发。
//!
pub mod broker_inmemory;
pub mod message;
pub mod publisher;
pub mod transport;

pub use broker_inmemory::InMemoryBroker;
pub use message::{BrokerMessage, MessageProperties};
pub use publisher::{BrokerPublisher, routing_key};
pub use transport::Broker;
