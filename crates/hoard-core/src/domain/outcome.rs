//! Outcome model: normalized results of one inference call.
//!
//! This module only defines the "shape" of results. How they are computed
//! lives in `inference`.

use serde::{Deserialize, Serialize};

use super::task_kind::TaskKind;

/// A label paired with its probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Text generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    /// Continuation with the echoed prompt removed.
    pub generated_text: String,
    /// Full decoded sequence, prompt included.
    pub full_text: String,
}

/// Text classification result.
///
/// Shape depends on `return_all_scores`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextClassification {
    Ranked {
        predictions: Vec<LabelScore>,
        top_prediction: LabelScore,
    },
    Top {
        label: String,
        score: f32,
        all_scores: Vec<LabelScore>,
    },
}

/// Image classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageClassification {
    /// Ranked, filtered by confidence threshold and truncated to `top_k`.
    pub predictions: Vec<LabelScore>,
    /// Argmax, reported even when it falls under the threshold.
    pub top_prediction: LabelScore,
}

/// A timestamped piece of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub text: String,
    pub start_secs: f32,
    pub end_secs: f32,
}

/// Speech recognition result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<TranscriptChunk>,
}

/// One task-specific result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "kebab-case")]
pub enum InferenceOutcome {
    TextGeneration(GeneratedText),
    TextClassification(TextClassification),
    ImageClassification(ImageClassification),
    SpeechRecognition(Transcription),
}

impl InferenceOutcome {
    pub fn task(&self) -> TaskKind {
        match self {
            InferenceOutcome::TextGeneration(_) => TaskKind::TextGeneration,
            InferenceOutcome::TextClassification(_) => TaskKind::TextClassification,
            InferenceOutcome::ImageClassification(_) => TaskKind::ImageClassification,
            InferenceOutcome::SpeechRecognition(_) => TaskKind::SpeechRecognition,
        }
    }
}
