/// Outbox 中继（内存版）示例
/// 展示 业务写入 -> Outbox -> Relay -> Broker 的闭环、进程内分发，
/// 以及 Broker 故障时的重试与死信
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use futures_util::StreamExt;
use outbox_domain::broker::{Broker, BrokerMessage, BrokerPublisher, InMemoryBroker};
use outbox_domain::domain_event::EventEnvelope;
use outbox_domain::error::{DomainError, DomainResult};
use outbox_domain::eventing::{EventDispatcher, EventHandler, HandledEventType, HandlerRegistry};
use outbox_domain::outbox::{
    InMemoryOutboxStore, OutboxRelay, OutboxStore, RelayConfig, serialize_records,
};
use outbox_macros::domain_event;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[domain_event(version = 1)]
enum UserEvent {
    Registered { email: String },
    #[event(event_type = "UserDeletedEvent")]
    Deleted { reason: String },
}

// ============================================================================
// 示例处理器（EventHandler）
// ============================================================================

struct PrintHandler {
    name: &'static str,
    types: HandledEventType,
    fail: bool,
}

#[async_trait]
impl EventHandler<UserEvent> for PrintHandler {
    fn handler_name(&self) -> &str {
        self.name
    }

    fn handled_event_type(&self) -> HandledEventType {
        self.types.clone()
    }

    async fn handle(&self, envelope: &EventEnvelope<UserEvent>) -> AnyResult<()> {
        if self.fail {
            anyhow::bail!("{} failed on {}", self.name, envelope.event_type());
        }
        println!(
            "handler={} type={} aggregate={} payload={:?}",
            self.name,
            envelope.event_type(),
            envelope.aggregate_id(),
            envelope.payload()
        );
        Ok(())
    }
}

// ============================================================================
// 可开关的 Broker：模拟中间件宕机与恢复
// ============================================================================

struct SwitchableBroker {
    inner: InMemoryBroker,
    down: AtomicBool,
}

#[async_trait]
impl Broker for SwitchableBroker {
    async fn send(&self, message: BrokerMessage) -> DomainResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(DomainError::broker("connection refused"));
        }
        self.inner.send(message).await
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    println!("=== Outbox 中继（内存版）示例 ===\n");

    let config = RelayConfig {
        drain_interval: Duration::from_millis(200),
        batch_size: 10,
        max_retries: 3,
        ..Default::default()
    };

    // Broker 与订阅者
    let memory_broker = InMemoryBroker::new(64);
    let mut subscriber = memory_broker.subscribe();
    tokio::spawn(async move {
        while let Some(message) = subscriber.next().await {
            match message {
                Ok(m) => println!(
                    "📨 broker: key={} correlation={} body={}",
                    m.routing_key,
                    m.properties.correlation_id,
                    String::from_utf8_lossy(&m.body)
                ),
                Err(err) => println!("⚠️ subscriber lagged: {err}"),
            }
        }
    });
    let broker = Arc::new(SwitchableBroker {
        inner: memory_broker,
        down: AtomicBool::new(false),
    });

    // Outbox
    let store = Arc::new(InMemoryOutboxStore::new(config.max_retries)?);

    // 进程内分发
    let registry = HandlerRegistry::builder()
        .subscribe(Arc::new(PrintHandler {
            name: "printer",
            types: HandledEventType::All,
            fail: false,
        }))
        .subscribe(Arc::new(PrintHandler {
            name: "audit",
            types: HandledEventType::One("UserDeletedEvent".to_string()),
            fail: true,
        }))
        .build()?;
    let dispatcher = EventDispatcher::new(registry);

    let events = vec![
        EventEnvelope::new(
            "user-1",
            UserEvent::Registered {
                email: "a@example.com".into(),
            },
        )?,
        EventEnvelope::new(
            "user-2",
            UserEvent::Deleted {
                reason: "requested".into(),
            },
        )?,
    ];
    store.append_all(serialize_records(&events)?).await?;
    for report in dispatcher.dispatch_many(&events).await {
        println!(
            "✅ 分发 {}: 成功 {} / 失败 {}",
            report.event_type,
            report.succeeded(),
            report.failures.len()
        );
    }

    // Relay
    let relay = Arc::new(
        OutboxRelay::<UserEvent>::builder()
            .store(store.clone())
            .publisher(BrokerPublisher::new(broker.clone()))
            .config(config)
            .build(),
    );
    let handle = relay.start()?;
    println!("✅ 中继已启动");

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Broker 宕机期间写入的事件会持续重试，直到进入死信
    broker.down.store(true, Ordering::SeqCst);
    let late = EventEnvelope::new(
        "user-3",
        UserEvent::Registered {
            email: "c@example.com".into(),
        },
    )?;
    store.append_all(serialize_records(&[late.clone()])?).await?;
    println!("✅ Broker 宕机，追加事件: {}", late.event_id());

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!(
        "📊 待投递 {} / 死信 {}",
        store.pending_count().await?,
        store.dead_lettered_count().await?
    );

    // 恢复后重新入队死信记录
    broker.down.store(false, Ordering::SeqCst);
    for record in store.dead_lettered(10).await? {
        println!(
            "♻️ 重新入队 {} (retry_count={}, last_error={:?})",
            record.id(),
            record.retry_count(),
            record.last_error()
        );
        store.requeue(record.id()).await?;
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.shutdown();
    handle.join().await;
    println!(
        "\n✅ 优雅关闭完成，待投递 {}",
        store.pending_count().await?
    );
    Ok(())
}
