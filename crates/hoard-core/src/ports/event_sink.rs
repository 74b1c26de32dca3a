//! EventSink port - イベント記録の抽象化
//!
//! # 実装
//! - **TracingEventSink**: tracing に構造化ログとして流す（デフォルト）
//! - **MemoryEventSink**: メモリに貯める（テスト・集計用）

use crate::domain::DomainEvent;

/// EventSink はドメインイベントを記録
///
/// 呼び出し側はホットパスにいることがあるので、emit はブロックしないこと。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}
