use crate::error::DomainResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// 领域事件载荷需要满足的通用能力边界
///
/// 通常由 `#[domain_event]` 宏为事件枚举生成实现：每个变体对应一种事件类型，
/// 枚举本身即该组事件的显式模式。
pub trait DomainEvent:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// 该枚举可能产生的全部事件类型，处理器注册表以此为键空间
    const EVENT_TYPES: &'static [&'static str];

    /// 事件类型（形如 `OrderEvent.Placed` 或自定义类型名）
    fn event_type(&self) -> &'static str;

    /// 事件载荷版本
    fn event_version(&self) -> usize {
        1
    }

    /// 载荷校验，拒绝不满足业务约束的事件
    fn validate(&self) -> DomainResult<()> {
        Ok(())
    }
}
