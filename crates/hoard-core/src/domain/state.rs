//! State - キャッシュエントリの状態

use serde::{Deserialize, Serialize};

/// EntryState は ModelCache の 1 エントリの状態
///
/// # 状態遷移
/// - absent -> loading: 最初の get_or_load が構築を開始
/// - loading -> ready: 構築成功
/// - loading -> absent: 構築失敗（次の呼び出しで再試行）
/// - ready -> absent: LRU / idle eviction、または明示的な evict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Absent,
    Loading,
    Ready,
}

impl EntryState {
    pub fn is_ready(self) -> bool {
        matches!(self, EntryState::Ready)
    }
}

/// EvictionReason はエントリが消えた理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// max_loaded_models を超えたので最も古く使われたものを捨てた
    Capacity,
    /// idle_ttl を超えて使われていない
    Idle,
    /// evict() / clear() による明示的な削除
    Explicit,
}
