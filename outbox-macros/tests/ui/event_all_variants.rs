use outbox_domain::domain_event::DomainEvent;
use outbox_domain::error::{DomainError, DomainResult};
use outbox_macros::domain_event;

// 测试单元变体
#[domain_event]
enum UnitVariantEvent {
    Activated,
    Deactivated,
}

// 测试元组变体
#[domain_event]
enum TupleEvent {
    Updated(String),
    Changed(i32, String, bool),
}

// 测试混合变体类型 + 枚举级版本与校验
#[domain_event(version = 3, validate = MixedEvent::check)]
enum MixedEvent {
    Started,
    Updated(String),
    #[event(event_type = "mixed.completed", event_version = 4)]
    Completed { result: i32 },
}

impl MixedEvent {
    fn check(&self) -> DomainResult<()> {
        match self {
            Self::Completed { result } if *result < 0 => Err(DomainError::InvalidEvent {
                event_type: self.event_type().to_string(),
                reason: "result must not be negative".into(),
            }),
            _ => Ok(()),
        }
    }
}

fn main() {
    assert_eq!(UnitVariantEvent::Activated.event_type(), "UnitVariantEvent.Activated");
    assert_eq!(UnitVariantEvent::Deactivated.event_type(), "UnitVariantEvent.Deactivated");

    assert_eq!(TupleEvent::Updated("x".into()).event_type(), "TupleEvent.Updated");
    assert_eq!(
        TupleEvent::Changed(42, "changed".into(), true).event_type(),
        "TupleEvent.Changed"
    );

    assert_eq!(
        MixedEvent::EVENT_TYPES,
        &["MixedEvent.Started", "MixedEvent.Updated", "mixed.completed"]
    );
    assert_eq!(MixedEvent::Started.event_version(), 3);
    assert_eq!(MixedEvent::Completed { result: 1 }.event_version(), 4);
    assert!(MixedEvent::Completed { result: 1 }.validate().is_ok());
    assert!(MixedEvent::Completed { result: -1 }.validate().is_err());
}
