//! 领域事件与事务性 Outbox 基础库（outbox-domain）
//!
//! 为「业务状态变更」与「事件对外投递」之间提供一致性保证：
//! - 领域事件（`domain_event`）：事件载荷协议与不可变事件信封；
//! - 进程内事件系统（`eventing`）：处理器注册表与并发分发器，失败相互隔离；
//! - 事务性 Outbox（`outbox`）：记录、存储协议（内存/SQLite 实现）与周期中继；
//! - Broker 投递（`broker`）：消息构造、路由键推导与传输边界。
//!
//! 典型用法：
//! 1. 使用 `#[domain_event]` 定义事件枚举，用 `EventEnvelope::new` 包装；
//! 2. 在业务事务中写入状态与 `OutboxRecord`（见 `SqliteOutboxStore::append_in_tx`）；
//! 3. 提交后可通过 `EventDispatcher` 进行进程内分发；
//! 4. 启动 `OutboxRelay`，周期性地将待投递记录发布到 Broker（至少一次语义）。
//!
pub mod broker;
pub mod domain_event;
pub mod error;
pub mod eventing;
pub mod outbox;

// 允许在本 crate 内部通过 ::outbox_domain 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::outbox_domain 路径。
extern crate self as outbox_domain;
