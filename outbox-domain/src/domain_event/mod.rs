//! 领域事件（Domain Event）与事件信封
//!
//! 定义事件载荷需要实现的最小接口（`DomainEvent`），以及在管线中流转的
//! 不可变事件信封 `EventEnvelope`。

mod domain_event_trait;
mod event_envelope;

pub use domain_event_trait::DomainEvent;
pub use event_envelope::EventEnvelope;
