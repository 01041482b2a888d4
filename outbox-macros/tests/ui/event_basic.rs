use outbox_domain::domain_event::DomainEvent;
use outbox_macros::domain_event;
use serde::{Deserialize, Serialize};

#[domain_event(version = 1)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum BankEvent {
    #[event(event_type = "bank.opened")]
    Opened { name: String },
    #[event(event_type = "bank.renamed", event_version = 2)]
    Renamed { to: String },
}

fn main() {
    assert_eq!(BankEvent::EVENT_TYPES, &["bank.opened", "bank.renamed"]);

    let opened = BankEvent::Opened { name: "alice".into() };
    assert_eq!(opened.event_type(), "bank.opened");
    assert_eq!(opened.event_version(), 1);

    let renamed = BankEvent::Renamed { to: "bob".into() };
    assert_eq!(renamed.event_type(), "bank.renamed");
    assert_eq!(renamed.event_version(), 2);
    assert!(renamed.validate().is_ok());
}
