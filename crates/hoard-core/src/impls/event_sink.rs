//! EventSink 実装
//!
//! - **TracingEventSink**: tracing に構造化ログとして流す
//! - **MemoryEventSink**: メモリに貯めて後から数える

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::DomainEvent;
use crate::ports::EventSink;

/// TracingEventSink は全イベントをログに出す
///
/// 失敗系（フォールバック・整合性エラーなど）は warn、それ以外は info。
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: DomainEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match event {
            DomainEvent::GatewayAttemptFailed { .. }
            | DomainEvent::ExtractionFallback { .. }
            | DomainEvent::IntegrityCheckFailed { .. }
            | DomainEvent::ModelLoadFailed { .. } => {
                warn!(event = event.name(), payload = %payload, "domain event");
            }
            _ => {
                info!(event = event.name(), payload = %payload, "domain event");
            }
        }
    }
}

/// MemoryEventSink はイベントをそのまま保持する
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// `DomainEvent::name()` が一致するイベントの数
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: DomainEvent) {
        self.events.lock().push(event);
    }
}
