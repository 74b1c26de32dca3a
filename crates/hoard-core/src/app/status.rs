//! Status - 運用向けのスナップショット
//!
//! キャッシュのエントリ一覧とカウンタ、content store のカウンタを
//! ひとまとめにして JSON で出せる形にします。

use serde::Serialize;

use crate::cache::CacheStatus;
use crate::impls::StoreStats;

/// StatusReport は App 全体の状態
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub cache: CacheStatus,
    pub store: StoreStats,
}
