use outbox_domain::domain_event::DomainEvent;
use outbox_macros::domain_event;

// 未显式派生时由宏补齐 Debug/Clone/PartialEq/Serialize/Deserialize
#[domain_event]
enum UserEvent {
    Created { name: String },
}

fn main() {
    let event = UserEvent::Created { name: "alice".into() };
    assert_eq!(event.event_type(), "UserEvent.Created");
    assert_eq!(event.event_version(), 1);
    assert_eq!(UserEvent::EVENT_TYPES, &["UserEvent.Created"]);

    let json = serde_json::to_string(&event).unwrap();
    let back: UserEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event.clone());
}
