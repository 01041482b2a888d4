//! 事务性 Outbox
//!
//! 业务写入与事件记录在同一事务中提交，随后由 `OutboxRelay` 异步投递到 Broker：
//! - `record`：Outbox 记录与投递状态；
//! - `store`：存储协议，`store_inmemory`/`store_sqlite` 为实现；
//! - `relay`：周期性拉取、发布、标记的后台中继；
//! - `config`：中继配置与环境变量读取。
//!
mod config;
mod record;
mod relay;
mod store;
mod store_inmemory;
#[cfg(feature = "infra-sqlx")]
mod store_sqlite;

pub use config::{
    ENV_BATCH_SIZE, ENV_DRAIN_INTERVAL_SECS, ENV_MAX_RETRIES, ENV_PUBLISH_MODE, PublishMode,
    RelayConfig,
};
pub use record::{OutboxRecord, RetryState, serialize_records};
pub use relay::{DrainReport, OutboxRelay, RelayHandle};
pub use store::OutboxStore;
pub use store_inmemory::InMemoryOutboxStore;
#[cfg(feature = "infra-sqlx")]
pub use store_sqlite::SqliteOutboxStore;
