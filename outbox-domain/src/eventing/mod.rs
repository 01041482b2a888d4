//! 进程内事件系统（eventing）
//!
//! 提供领域事件在进程内的订阅与扇出：
//! - `EventHandler`：对某类/多类/全部事件进行消费处理；
//! - `HandlerRegistry`：启动时显式装配、按事件类型标签分组的只读注册表；
//! - `EventDispatcher`：并发调用匹配的处理器，逐个隔离失败并汇总报告。
//!
//! 该模块与 Outbox/Broker 路径完全解耦，二者只共享 `EventEnvelope` 形态。
//!
pub mod dispatcher;
pub mod handler;
pub mod registry;

pub use dispatcher::{DispatchReport, EventDispatcher, HandlerFailure};
pub use handler::{EventHandler, HandledEventType};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
