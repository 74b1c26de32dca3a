//! ArtifactStore port - content hash からローカルディレクトリへの解決
//!
//! # 実装
//! - **FsArtifactStore**: `{cache_root}/{hash}` に展開して保持する

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{ContentHash, HoardError};

/// ArtifactStore は hash を materialize 済みディレクトリに解決する
///
/// # 契約
/// - 冪等: 一度解決した hash はネットワークに触れずに同じパスを返す
/// - 同じ hash への同時呼び出しでダウンロードは 1 回だけ
/// - 失敗: Unavailable（全 gateway 失敗）、ArtifactTooLarge、Storage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn resolve(&self, hash: &ContentHash) -> Result<PathBuf, HoardError>;
}
