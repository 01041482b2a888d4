//! 领域层统一错误定义
//!
//! 聚焦序列化、事件模式校验、Outbox 存储、Broker 投递与配置校验等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
use thiserror::Error;

/// 统一错误类型（Outbox 管线最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化/事件模式 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
    #[error("invalid event: type={event_type}, reason={reason}")]
    InvalidEvent { event_type: String, reason: String },

    // --- 事件系统 ---
    #[error("broker error: {reason}")]
    Broker { reason: String },
    #[error("event handler error: handler={handler}, reason={reason}")]
    EventHandler { handler: String, reason: String },

    // --- Outbox/持久化 ---
    #[error("outbox store error: {reason}")]
    OutboxStore { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("duplicate event: {event_id}")]
    DuplicateEvent { event_id: String },

    // --- 配置 ---
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

impl DomainError {
    pub fn broker(reason: impl Into<String>) -> Self {
        Self::Broker {
            reason: reason.into(),
        }
    }

    pub fn outbox_store(reason: impl Into<String>) -> Self {
        Self::OutboxStore {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在基础设施层直接使用 `?` 将 sqlx/uuid 等错误转换为 DomainError

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<uuid::Error> for DomainError {
    fn from(err: uuid::Error) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for DomainError {
    fn from(err: chrono::ParseError) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}
