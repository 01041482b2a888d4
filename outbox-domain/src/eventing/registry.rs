//! 处理器注册表（HandlerRegistry）
//!
//! 在进程启动时通过构建器一次性装配，按事件类型标签分组处理器；
//! 构建完成后只读，分发期间无需加锁。
//!
use super::{EventHandler, HandledEventType};
use crate::domain_event::DomainEvent;
use crate::error::{DomainError, DomainResult};
use std::collections::HashMap;
use std::sync::Arc;

pub struct HandlerRegistry<E>
where
    E: DomainEvent,
{
    by_type: HashMap<&'static str, Vec<Arc<dyn EventHandler<E>>>>,
}

impl<E> Clone for HandlerRegistry<E>
where
    E: DomainEvent,
{
    fn clone(&self) -> Self {
        Self {
            by_type: self.by_type.clone(),
        }
    }
}

impl<E> HandlerRegistry<E>
where
    E: DomainEvent,
{
    pub fn builder() -> HandlerRegistryBuilder<E> {
        HandlerRegistryBuilder {
            registrations: Vec::new(),
        }
    }

    /// 返回订阅了该事件类型的处理器（按注册顺序）；未知类型返回空切片
    pub fn handlers_for(&self, event_type: &str) -> &[Arc<dyn EventHandler<E>>] {
        self.by_type
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 已注册至少一个处理器的事件类型
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_type.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// 注册表构建器：收集 (事件类型, 处理器) 对，`build` 时统一校验
pub struct HandlerRegistryBuilder<E>
where
    E: DomainEvent,
{
    registrations: Vec<(HandledEventType, Arc<dyn EventHandler<E>>)>,
}

impl<E> HandlerRegistryBuilder<E>
where
    E: DomainEvent,
{
    /// 为指定事件类型显式注册处理器
    pub fn register(
        mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Self {
        self.registrations
            .push((HandledEventType::One(event_type.into()), handler));
        self
    }

    /// 按处理器自身声明的 `handled_event_type` 注册
    pub fn subscribe(mut self, handler: Arc<dyn EventHandler<E>>) -> Self {
        self.registrations
            .push((handler.handled_event_type(), handler));
        self
    }

    pub fn subscribe_all(self, handlers: impl IntoIterator<Item = Arc<dyn EventHandler<E>>>) -> Self {
        handlers.into_iter().fold(self, Self::subscribe)
    }

    /// 校验所有事件类型都属于 `E::EVENT_TYPES`，并展开 `All`
    pub fn build(self) -> DomainResult<HandlerRegistry<E>> {
        let mut by_type: HashMap<&'static str, Vec<Arc<dyn EventHandler<E>>>> = HashMap::new();

        for (types, handler) in self.registrations {
            let tags: Vec<&'static str> = match types {
                HandledEventType::All => E::EVENT_TYPES.to_vec(),
                HandledEventType::One(t) => vec![resolve::<E>(&t)?],
                HandledEventType::Many(ts) => ts
                    .iter()
                    .map(|t| resolve::<E>(t))
                    .collect::<DomainResult<Vec<_>>>()?,
            };

            for tag in tags {
                let list = by_type.entry(tag).or_default();
                // 同一处理器重复订阅同一类型只调用一次
                if !list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                    list.push(handler.clone());
                }
            }
        }

        Ok(HandlerRegistry { by_type })
    }
}

fn resolve<E: DomainEvent>(event_type: &str) -> DomainResult<&'static str> {
    E::EVENT_TYPES
        .iter()
        .copied()
        .find(|t| *t == event_type)
        .ok_or_else(|| DomainError::UnknownEventType {
            event_type: event_type.to_string(),
        })
}
