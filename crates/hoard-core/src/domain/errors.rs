//! Errors - エラー型と分類
//!
//! 呼び出し側には「分類（StatusClass）+ メッセージ」だけを返します。
//! reqwest / zip / io などの生エラーはここで文字列化して閉じ込めます。
//!
//! # 局所的に回復するもの（ここには現れない）
//! - gateway 単位の失敗: 次の gateway にフォールバック（全滅したら Unavailable）
//! - archive 展開の失敗: 単一ファイル `model_file` として保存

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::envelope::ErrorEnvelope;

/// StatusClass は呼び出し側に見せるエラー分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// content hash が解決できなかった
    NotFound,
    /// task / パラメータ / 入力が不正
    BadRequest,
    /// load / inference / storage の失敗
    Internal,
}

/// HoardError はドメインエラー
#[derive(Debug, Clone, Error)]
pub enum HoardError {
    #[error("could not download {hash} from any gateway ({attempts} attempts, last error: {last_error})")]
    Unavailable {
        hash: String,
        attempts: usize,
        last_error: String,
    },

    #[error("artifact {hash} exceeds the size limit of {limit} bytes")]
    ArtifactTooLarge { hash: String, limit: u64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unsupported task: {0}")]
    UnsupportedTask(String),

    #[error("failed to load model: {0}")]
    Load(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, HoardError>;

impl HoardError {
    /// ファイルシステム操作の失敗をパス付きで包む
    pub fn storage(path: &Path, err: impl Display) -> Self {
        Self::Storage(format!("{}: {}", path.display(), err))
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::Load(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// 運用分類
    pub fn status(&self) -> StatusClass {
        match self {
            HoardError::Unavailable { .. } => StatusClass::NotFound,
            HoardError::UnsupportedTask(_)
            | HoardError::InvalidInput(_)
            | HoardError::ArtifactTooLarge { .. } => StatusClass::BadRequest,
            HoardError::Storage(_)
            | HoardError::Load(_)
            | HoardError::Inference(_)
            | HoardError::Timeout(_) => StatusClass::Internal,
        }
    }

    /// 呼び出し側に返すエラー envelope に変換
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status: self.status(),
            message: self.to_string(),
        }
    }
}
