//! ModelBackend port - 推論エンジンとの境界
//!
//! hoard は artifact の取得・キャッシュ・dispatch を担当し、
//! トークナイザやモデルの数値計算そのものはこの port の実装に任せます。
//!
//! # 設計原則
//! - すべて同期 API（重い計算なので呼び出し側が spawn_blocking で包む）
//! - 部品単位の constructor（tokenizer / model / processor / pipeline）
//!   を ModelCache が TaskKind ごとに組み合わせる
//! - 失敗は `HoardError::Load`（構築）と `HoardError::Inference`（実行）で返す

use std::path::Path;
use std::sync::Arc;

use crate::domain::{HoardError, Transcription};

/// Tokenizer は text と token id を相互変換する
pub trait Tokenizer: Send + Sync {
    /// `truncate_to` が Some(n) なら先頭 n token に切り詰める
    fn encode(&self, text: &str, truncate_to: Option<usize>) -> Result<Vec<u32>, HoardError>;

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, HoardError>;

    fn eos_token_id(&self) -> Option<u32>;

    fn pad_token_id(&self) -> Option<u32>;
}

/// 生成時の設定
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub do_sample: bool,
    pub pad_token_id: Option<u32>,
    pub eos_token_id: Option<u32>,
}

/// CausalLm は prompt の続きを生成する
pub trait CausalLm: Send + Sync {
    /// prompt を含む全系列を返す
    fn generate(&self, input_ids: &[u32], config: &GenerationConfig) -> Result<Vec<u32>, HoardError>;
}

/// SequenceClassifier は token 列を label ごとの logits に写す
pub trait SequenceClassifier: Send + Sync {
    fn logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, HoardError>;

    /// artifact が label 名を持たなければ None（`LABEL_{i}` で補う）
    fn labels(&self) -> Option<&[String]>;
}

/// ImageProcessor はエンコード済み画像をモデル入力に変換する
pub trait ImageProcessor: Send + Sync {
    fn preprocess(&self, image: &[u8]) -> Result<Vec<f32>, HoardError>;
}

/// ImageClassifier は前処理済みの画素値を logits に写す
pub trait ImageClassifier: Send + Sync {
    fn logits(&self, pixel_values: &[f32]) -> Result<Vec<f32>, HoardError>;

    fn labels(&self) -> Option<&[String]>;
}

/// 音声認識の実行オプション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpeechOptions<'a> {
    /// None なら言語自動判定
    pub language: Option<&'a str>,
    pub return_timestamps: bool,
}

/// SpeechPipeline は前処理からデコードまでを一体で行う
pub trait SpeechPipeline: Send + Sync {
    fn transcribe(&self, audio: &[u8], options: &SpeechOptions<'_>) -> Result<Transcription, HoardError>;
}

/// ModelBackend は materialize 済みディレクトリから部品を構築する
pub trait ModelBackend: Send + Sync {
    fn load_tokenizer(&self, dir: &Path) -> Result<Arc<dyn Tokenizer>, HoardError>;

    fn load_causal_lm(&self, dir: &Path) -> Result<Arc<dyn CausalLm>, HoardError>;

    fn load_sequence_classifier(&self, dir: &Path) -> Result<Arc<dyn SequenceClassifier>, HoardError>;

    fn load_image_processor(&self, dir: &Path) -> Result<Arc<dyn ImageProcessor>, HoardError>;

    fn load_image_classifier(&self, dir: &Path) -> Result<Arc<dyn ImageClassifier>, HoardError>;

    fn load_speech_pipeline(&self, dir: &Path) -> Result<Arc<dyn SpeechPipeline>, HoardError>;
}
