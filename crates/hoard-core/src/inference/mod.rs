//! Inference - load 済み handle に入力を流して結果を正規化する
//!
//! task ごとの計算は下位モジュールにあり、ここでは
//! (部品, 入力, パラメータ) の組み合わせを検査して振り分けるだけです。
//! 計算は重いので spawn_blocking で executor の外に出します。

pub mod classification;
pub mod speech;
pub mod text_generation;

use std::sync::Arc;

use tracing::debug;

use crate::cache::{LoadedHandle, ModelParts};
use crate::domain::{HoardError, InferenceInput, InferenceOutcome, InferenceParameters, TaskKind};

/// task が期待する入力の種類
pub fn expected_modality(task: TaskKind) -> &'static str {
    match task {
        TaskKind::TextGeneration | TaskKind::TextClassification => "text",
        TaskKind::ImageClassification => "image",
        TaskKind::SpeechRecognition => "audio",
    }
}

/// InferenceDispatcher は handle の task に応じた推論ルーチンを呼ぶ
#[derive(Debug, Clone, Copy, Default)]
pub struct InferenceDispatcher;

impl InferenceDispatcher {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(
        &self,
        handle: Arc<LoadedHandle>,
        input: InferenceInput,
        params: InferenceParameters,
    ) -> Result<InferenceOutcome, HoardError> {
        debug!(key = %handle.key(), modality = input.modality(), "dispatching inference");
        tokio::task::spawn_blocking(move || Self::run_blocking(&handle, input, &params))
            .await
            .map_err(|e| HoardError::inference(format!("inference task failed: {e}")))?
    }

    /// 同期版（呼び出し側がすでにブロッキング文脈にいる場合）
    pub fn run_blocking(
        handle: &LoadedHandle,
        input: InferenceInput,
        params: &InferenceParameters,
    ) -> Result<InferenceOutcome, HoardError> {
        match (handle.parts(), input, params) {
            (
                ModelParts::TextGeneration {
                    tokenizer,
                    model,
                    pad_token_id,
                },
                InferenceInput::Text(text),
                InferenceParameters::TextGeneration(p),
            ) => text_generation::generate(tokenizer.as_ref(), model.as_ref(), *pad_token_id, &text, p)
                .map(InferenceOutcome::TextGeneration),

            (
                ModelParts::TextClassification { tokenizer, model },
                InferenceInput::Text(text),
                InferenceParameters::TextClassification(p),
            ) => classification::classify_text(tokenizer.as_ref(), model.as_ref(), &text, p)
                .map(InferenceOutcome::TextClassification),

            (
                ModelParts::ImageClassification { processor, model },
                InferenceInput::Image(image),
                InferenceParameters::ImageClassification(p),
            ) => classification::classify_image(processor.as_ref(), model.as_ref(), &image, p)
                .map(InferenceOutcome::ImageClassification),

            (
                ModelParts::SpeechRecognition { pipeline },
                InferenceInput::Audio(audio),
                InferenceParameters::SpeechRecognition(p),
            ) => speech::transcribe(pipeline.as_ref(), &audio, p).map(InferenceOutcome::SpeechRecognition),

            (parts, input, params) => Err(mismatch(parts.task(), &input, params)),
        }
    }
}

fn mismatch(task: TaskKind, input: &InferenceInput, params: &InferenceParameters) -> HoardError {
    if params.task() != task {
        HoardError::invalid_input(format!(
            "{} parameters cannot be used with a {task} model",
            params.task()
        ))
    } else {
        HoardError::invalid_input(format!(
            "{task} expects {} input, got {}",
            expected_modality(task),
            input.modality()
        ))
    }
}
