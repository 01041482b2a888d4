use anyhow::Result as AnyResult;
use async_trait::async_trait;
use futures_util::StreamExt;
use outbox_domain::broker::{BrokerPublisher, InMemoryBroker};
use outbox_domain::domain_event::{DomainEvent, EventEnvelope};
use outbox_domain::error::{DomainError, DomainResult};
use outbox_domain::eventing::{EventDispatcher, EventHandler, HandledEventType, HandlerRegistry};
use outbox_domain::outbox::{
    OutboxRelay, OutboxStore, RelayConfig, SqliteOutboxStore, serialize_records,
};
use outbox_macros::domain_event;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[domain_event(validate = OrderEvent::check)]
enum OrderEvent {
    Placed { customer: String, total_cents: i64 },
    Paid { total_cents: i64 },
}

impl OrderEvent {
    fn check(&self) -> DomainResult<()> {
        match self {
            Self::Placed { total_cents, .. } | Self::Paid { total_cents } if *total_cents <= 0 => {
                Err(DomainError::InvalidEvent {
                    event_type: self.event_type().to_string(),
                    reason: "total must be positive".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// 读模型投影：进程内消费事件
struct SalesProjection;

#[async_trait]
impl EventHandler<OrderEvent> for SalesProjection {
    fn handler_name(&self) -> &str {
        "sales_projection"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::One("OrderEvent.Paid".to_string())
    }

    async fn handle(&self, envelope: &EventEnvelope<OrderEvent>) -> anyhow::Result<()> {
        if let OrderEvent::Paid { total_cents } = envelope.payload() {
            tracing::info!(order_id = envelope.aggregate_id(), total_cents, "sales updated");
        }
        Ok(())
    }
}

/// 在同一事务中写入订单与 Outbox 记录
async fn place_order(
    store: &SqliteOutboxStore,
    order_id: &str,
    customer: &str,
    total_cents: i64,
) -> AnyResult<Vec<EventEnvelope<OrderEvent>>> {
    let events = vec![
        EventEnvelope::new(
            order_id,
            OrderEvent::Placed {
                customer: customer.to_string(),
                total_cents,
            },
        )?,
        EventEnvelope::new(order_id, OrderEvent::Paid { total_cents })?,
    ];

    let mut tx = store.pool().begin().await?;
    sqlx::query("INSERT INTO orders (id, customer, total_cents, status) VALUES (?, ?, ?, 'paid')")
        .bind(order_id)
        .bind(customer)
        .bind(total_cents)
        .execute(&mut *tx)
        .await?;
    store
        .append_in_tx(&mut tx, &serialize_records(&events)?)
        .await?;
    tx.commit().await?;

    Ok(events)
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outbox_domain=debug,outbox_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env();
    config.validate()?;
    tracing::info!(?config, "starting outbox demo");

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            customer TEXT NOT NULL,
            total_cents INTEGER NOT NULL,
            status TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;
    let store = Arc::new(SqliteOutboxStore::new(pool, config.max_retries).await?);

    // 模拟下游消费者
    let broker = Arc::new(InMemoryBroker::new(256));
    let mut messages = broker.subscribe();
    tokio::spawn(async move {
        while let Some(message) = messages.next().await {
            match message {
                Ok(m) => tracing::info!(
                    routing_key = %m.routing_key,
                    correlation_id = %m.properties.correlation_id,
                    "message received"
                ),
                Err(err) => tracing::warn!(error = %err, "subscriber lagged"),
            }
        }
    });

    let dispatcher = EventDispatcher::new(
        HandlerRegistry::builder()
            .subscribe(Arc::new(SalesProjection))
            .build()?,
    );

    let relay = Arc::new(
        OutboxRelay::<OrderEvent>::builder()
            .store(store.clone())
            .publisher(BrokerPublisher::new(broker))
            .config(config)
            .build(),
    );
    let handle = relay.start()?;

    for (order_id, customer, total) in [("order-1", "alice", 1250), ("order-2", "bob", 990)] {
        let events = place_order(&store, order_id, customer, total).await?;
        // 提交之后才进行进程内分发；处理器失败不影响订单
        for report in dispatcher.dispatch_many(&events).await {
            if let Err(err) = report.ensure_clean() {
                tracing::warn!(event_id = %report.event_id, error = %err, "dispatch had failures");
            }
        }
    }
    tracing::info!(pending = store.pending_count().await?, "orders placed, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    handle.join().await;

    tracing::info!(
        pending = store.pending_count().await?,
        dead_lettered = store.dead_lettered_count().await?,
        "outbox demo stopped"
    );
    Ok(())
}
