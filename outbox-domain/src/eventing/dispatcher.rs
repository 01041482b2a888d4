//! 事件分发器（EventDispatcher）
//!
//! 将事件信封扇出给注册表中订阅了该类型的全部处理器：
//! - 同一事件的处理器并发执行，调用方在全部完成后返回；
//! - 每个处理器的错误与 panic 被单独捕获、记录并汇总到 `DispatchReport`，
//!   不会影响其他处理器，也不会传播给事件的产生方。
//!
use super::{EventHandler, HandlerRegistry};
use crate::domain_event::{DomainEvent, EventEnvelope};
use crate::error::{DomainError, DomainResult};
use futures_util::{FutureExt, StreamExt, future, stream};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use uuid::Uuid;

/// 单个处理器的失败记录
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub reason: String,
}

/// 一次分发的结果汇总
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_id: Uuid,
    pub event_type: String,
    /// 被调用的处理器数量
    pub invoked: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// 存在失败时转换为 `DomainError::EventHandler`，多个失败合并为一条
    pub fn ensure_clean(&self) -> DomainResult<()> {
        if self.is_clean() {
            return Ok(());
        }

        let handler = self
            .failures
            .iter()
            .map(|f| f.handler.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let reason = self
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.handler, f.reason))
            .collect::<Vec<_>>()
            .join("; ");

        Err(DomainError::EventHandler { handler, reason })
    }
}

impl From<HandlerFailure> for DomainError {
    fn from(failure: HandlerFailure) -> Self {
        DomainError::EventHandler {
            handler: failure.handler,
            reason: failure.reason,
        }
    }
}

pub struct EventDispatcher<E>
where
    E: DomainEvent,
{
    registry: HandlerRegistry<E>,
}

impl<E> EventDispatcher<E>
where
    E: DomainEvent,
{
    pub fn new(registry: HandlerRegistry<E>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry<E> {
        &self.registry
    }

    /// 分发单个事件：并发调用全部匹配的处理器并等待其完成，从不返回错误
    pub async fn dispatch(&self, envelope: &EventEnvelope<E>) -> DispatchReport {
        let handlers = self.registry.handlers_for(envelope.event_type());

        if handlers.is_empty() {
            tracing::trace!(
                event_type = envelope.event_type(),
                event_id = %envelope.event_id(),
                "no handlers registered"
            );
        }

        let outcomes = future::join_all(
            handlers
                .iter()
                .map(|handler| Self::invoke(handler, envelope)),
        )
        .await;

        let failures: Vec<HandlerFailure> = outcomes.into_iter().flatten().collect();

        DispatchReport {
            event_id: envelope.event_id(),
            event_type: envelope.event_type().to_string(),
            invoked: handlers.len(),
            failures,
        }
    }

    /// 分发多个事件：各事件之间互不依赖、并发执行，不保证顺序；报告按输入顺序返回
    pub async fn dispatch_many(&self, envelopes: &[EventEnvelope<E>]) -> Vec<DispatchReport> {
        let mut indexed: Vec<(usize, DispatchReport)> = stream::iter(envelopes.iter().enumerate())
            .map(|(i, envelope)| async move { (i, self.dispatch(envelope).await) })
            .buffer_unordered(envelopes.len().max(1))
            .collect()
            .await;

        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, report)| report).collect()
    }

    async fn invoke(
        handler: &Arc<dyn EventHandler<E>>,
        envelope: &EventEnvelope<E>,
    ) -> Option<HandlerFailure> {
        let result = AssertUnwindSafe(handler.handle(envelope))
            .catch_unwind()
            .await;

        let reason = match result {
            Ok(Ok(())) => return None,
            Ok(Err(err)) => format!("{err:#}"),
            Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
        };

        tracing::error!(
            handler = handler.handler_name(),
            event_type = envelope.event_type(),
            event_id = %envelope.event_id(),
            error = %reason,
            "event handler failed"
        );

        Some(HandlerFailure {
            handler: handler.handler_name().to_string(),
            reason,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
