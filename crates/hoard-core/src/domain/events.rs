//! Events - ドメインイベント
//!
//! ログに流すだけでなく EventSink に送ることで、
//! archive 展開のフォールバックや整合性エラーを運用側で数えられるようにします。

use serde::Serialize;

use super::artifact::{ArtifactLayout, PayloadKind};
use super::content_hash::ContentHash;
use super::state::EvictionReason;
use super::task_kind::CacheKey;

/// DomainEvent はドメインで発生したイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// 1 つの gateway への試行が失敗した（次の gateway に進む）
    GatewayAttemptFailed {
        hash: ContentHash,
        gateway: String,
        reason: String,
    },

    /// gateway から bytes を取得できた
    ArtifactFetched {
        hash: ContentHash,
        source_url: String,
        bytes: u64,
    },

    /// archive として宣言された payload を展開できず、単一ファイルとして保存した
    ExtractionFallback {
        hash: ContentHash,
        declared: PayloadKind,
        reason: String,
    },

    /// ディスク上に artifact を確定させた
    ArtifactMaterialized {
        hash: ContentHash,
        layout: ArtifactLayout,
        total_bytes: u64,
    },

    /// キャッシュ済みディレクトリが manifest と一致しなかった
    IntegrityCheckFailed { hash: ContentHash, reason: String },

    ModelLoaded { key: CacheKey, elapsed_ms: u64 },

    ModelLoadFailed { key: CacheKey, reason: String },

    ModelEvicted {
        key: CacheKey,
        reason: EvictionReason,
    },
}

impl DomainEvent {
    /// ログ・集計用の短い名前
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::GatewayAttemptFailed { .. } => "gateway_attempt_failed",
            DomainEvent::ArtifactFetched { .. } => "artifact_fetched",
            DomainEvent::ExtractionFallback { .. } => "extraction_fallback",
            DomainEvent::ArtifactMaterialized { .. } => "artifact_materialized",
            DomainEvent::IntegrityCheckFailed { .. } => "integrity_check_failed",
            DomainEvent::ModelLoaded { .. } => "model_loaded",
            DomainEvent::ModelLoadFailed { .. } => "model_load_failed",
            DomainEvent::ModelEvicted { .. } => "model_evicted",
        }
    }
}
