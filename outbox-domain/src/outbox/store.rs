//! Outbox 存储（OutboxStore）协议
//!
//! 持久保存等待外部投递的事件记录。`append` 需要与产生事件的业务状态变更处于
//! 同一原子工作单元内；`mark_*` 仅由 Outbox 中继调用。
//!
use super::{OutboxRecord, RetryState};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// 失败次数上限：`retry_count` 达到该值的记录不再被拉取并进入死信状态
    fn max_retries(&self) -> u32;

    /// 追加一条新记录；ID 已存在时返回 `DuplicateEvent`
    async fn append(&self, record: OutboxRecord) -> Result<()>;

    /// 原子地追加一组记录：要么全部写入，要么全部不写入
    async fn append_all(&self, records: Vec<OutboxRecord>) -> Result<()>;

    /// 拉取至多 `batch_size` 条待投递记录（未投递且重试次数未达上限），按创建时间升序
    async fn fetch_pending(&self, batch_size: usize) -> Result<Vec<OutboxRecord>>;

    /// 标记投递成功；对已投递记录为幂等空操作
    async fn mark_delivered(&self, id: Uuid) -> Result<()>;

    /// 记录一次投递失败：重试次数加一并保存错误信息
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<RetryState>;

    /// 待投递记录数量
    async fn pending_count(&self) -> Result<usize>;

    /// 重试耗尽的死信记录，按进入死信的时间升序
    async fn dead_lettered(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    async fn dead_lettered_count(&self) -> Result<usize>;

    /// 清零重试次数并移出死信状态，使记录重新参与投递
    async fn requeue(&self, id: Uuid) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<OutboxRecord>>;
}

/// 存储构造时校验重试上限；为 0 时没有记录能被拉取，也不会进入死信
pub(crate) fn ensure_max_retries(max_retries: u32) -> Result<()> {
    if max_retries == 0 {
        return Err(DomainError::InvalidConfig {
            reason: "max_retries must be greater than zero".to_string(),
        });
    }
    Ok(())
}
