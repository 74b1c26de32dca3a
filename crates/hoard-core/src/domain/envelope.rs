//! Envelope - 推論リクエスト / レスポンスの運搬用データ
//!
//! HTTP ルーティングはこのクレートの外側にあります。
//! ここでは wire 形式（serde）と、それを検証済みの型に変換する部分だけを持ちます。

use serde::{Deserialize, Serialize};

use super::errors::StatusClass;
use super::ids::RequestId;
use super::outcome::InferenceOutcome;
use super::params::InferenceParameters;
use super::task_kind::TaskKind;

/// InferenceInput は入力ペイロード（text / image / audio）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum InferenceInput {
    Text(String),
    /// エンコード済み画像（PNG / JPEG など、processor が解釈する）
    Image(Vec<u8>),
    /// エンコード済み音声（WAV / FLAC など、pipeline が解釈する）
    Audio(Vec<u8>),
}

impl InferenceInput {
    pub fn modality(&self) -> &'static str {
        match self {
            InferenceInput::Text(_) => "text",
            InferenceInput::Image(_) => "image",
            InferenceInput::Audio(_) => "audio",
        }
    }
}

/// InferenceRequest は未検証の wire リクエスト
///
/// `task` と `content_hash` は文字列のまま受け取り、Runtime が I/O の前に検証します。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub content_hash: String,
    pub task: String,
    pub input: InferenceInput,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl InferenceRequest {
    pub fn new(content_hash: impl Into<String>, task: impl Into<String>, input: InferenceInput) -> Self {
        Self {
            content_hash: content_hash.into(),
            task: task.into(),
            input,
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// InferenceResponse は成功時の envelope
///
/// `parameters_used` は実際に使った（default 補完後の）値。再現とデバッグ用。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResponse {
    pub request_id: RequestId,
    pub content_hash: String,
    pub task: TaskKind,
    pub outcome: InferenceOutcome,
    pub parameters_used: InferenceParameters,
    pub elapsed_ms: u64,
}

/// ErrorEnvelope は失敗時の envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: StatusClass,
    pub message: String,
}
