//! App - アプリケーション層
//!
//! ports と content / cache / inference を組み合わせて外向きの API にします。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定からのワイヤリング
//! - **Runtime**: 推論リクエストの入口
//! - **ReaperLoop**: idle なモデルの回収
//! - **StatusReport**: 運用向けスナップショット

pub mod builder;
pub mod reaper_loop;
pub mod runtime;
pub mod status;

pub use self::builder::{App, AppBuilder, BuildError, open_store};
pub use self::reaper_loop::{ReaperHandle, ReaperLoop};
pub use self::runtime::Runtime;
pub use self::status::StatusReport;
