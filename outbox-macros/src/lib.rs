//! Outbox 事件模式宏（outbox-macros）
//!
//! 提供 `#[domain_event]`：把一个事件枚举声明为显式、带类型标签的事件模式，
//! 并生成 `::outbox_domain::domain_event::DomainEvent` 实现。
//!
use proc_macro::TokenStream;

mod domain_event;
mod utils;

/// 事件枚举宏
/// - 合并默认派生：`Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize`
/// - 为每个变体生成事件类型标签（默认 `枚举名.变体名`）与版本号
/// - 支持：`#[domain_event(version = N, validate = path::to_fn)]`（枚举级默认值与校验函数）
/// - 变体可覆写：`#[event(event_type = "...", event_version = N)]`
#[proc_macro_attribute]
pub fn domain_event(attr: TokenStream, item: TokenStream) -> TokenStream {
    domain_event::expand(attr, item)
}
