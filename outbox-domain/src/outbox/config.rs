//! 中继配置（RelayConfig）
//!
//! 周期间隔、批次大小、重试上限与发布模式；
//! 可从 `OUTBOX_*` 环境变量读取，缺省或无法解析的值回落到默认值。
//! 重试上限须与所用 `OutboxStore` 的上限一致，由中继启动时校验。
//!
use crate::error::{DomainError, DomainResult};
use std::time::Duration;

pub const ENV_DRAIN_INTERVAL_SECS: &str = "OUTBOX_DRAIN_INTERVAL_SECS";
pub const ENV_BATCH_SIZE: &str = "OUTBOX_BATCH_SIZE";
pub const ENV_MAX_RETRIES: &str = "OUTBOX_MAX_RETRIES";
pub const ENV_PUBLISH_MODE: &str = "OUTBOX_PUBLISH_MODE";

/// 中继向 Broker 发送一个批次的方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PublishMode {
    /// 逐条发布并逐条标记
    #[default]
    Single,
    /// 整批一次发送；失败时回退为逐条发布
    Batch,
}

/// Outbox 中继配置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Outbox -> Broker 的周期间隔
    pub drain_interval: Duration,
    /// 单个周期拉取的最大记录数
    pub batch_size: usize,
    /// 最大失败次数，达到后记录进入死信状态
    pub max_retries: u32,
    pub publish_mode: PublishMode,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(30),
            batch_size: 100,
            max_retries: 5,
            publish_mode: PublishMode::Single,
        }
    }
}

impl RelayConfig {
    /// 从进程环境变量读取，缺失或无法解析的值使用默认值
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            drain_interval: parse_or(&lookup, ENV_DRAIN_INTERVAL_SECS, defaults.drain_interval.as_secs())
                .map(Duration::from_secs)
                .unwrap_or(defaults.drain_interval),
            batch_size: parse_or(&lookup, ENV_BATCH_SIZE, defaults.batch_size)
                .unwrap_or(defaults.batch_size),
            max_retries: parse_or(&lookup, ENV_MAX_RETRIES, defaults.max_retries)
                .unwrap_or(defaults.max_retries),
            publish_mode: match lookup(ENV_PUBLISH_MODE).as_deref().map(str::trim) {
                None => defaults.publish_mode,
                Some(v) if v.eq_ignore_ascii_case("single") => PublishMode::Single,
                Some(v) if v.eq_ignore_ascii_case("batch") => PublishMode::Batch,
                Some(other) => {
                    tracing::warn!(
                        key = ENV_PUBLISH_MODE,
                        value = other,
                        "unrecognized publish mode, using default"
                    );
                    defaults.publish_mode
                }
            },
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.drain_interval.is_zero() {
            return Err(invalid("drain_interval must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> DomainError {
    DomainError::InvalidConfig {
        reason: reason.to_string(),
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Option<T>
where
    T: std::str::FromStr + std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, %default, "invalid config value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RelayConfig::from_lookup(|_| None);
        assert_eq!(cfg, RelayConfig::default());
        assert_eq!(cfg.drain_interval, Duration::from_secs(30));
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.publish_mode, PublishMode::Single);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overrides_and_fallbacks() {
        let cfg = RelayConfig::from_lookup(lookup_from(&[
            (ENV_DRAIN_INTERVAL_SECS, "5"),
            (ENV_BATCH_SIZE, "lots"),
            (ENV_MAX_RETRIES, " 3 "),
            (ENV_PUBLISH_MODE, "BATCH"),
        ]));

        assert_eq!(cfg.drain_interval, Duration::from_secs(5));
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.publish_mode, PublishMode::Batch);
    }

    #[test]
    fn zero_values_are_rejected() {
        let cfg = RelayConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DomainError::InvalidConfig { .. })));

        let cfg = RelayConfig::from_lookup(lookup_from(&[(ENV_MAX_RETRIES, "0")]));
        assert!(cfg.validate().is_err());
    }
}
