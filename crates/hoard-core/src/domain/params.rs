//! Per-request inference parameters.
//!
//! Each task has its own parameter struct with defaults. Requests carry
//! parameters as free-form JSON; `InferenceParameters::parse` picks the struct
//! for the task, fills defaults and validates ranges. The effective values are
//! echoed back in every response.

use std::fmt::Display;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::HoardError;
use super::task_kind::TaskKind;

/// Text generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextGenerationParams {
    /// Maximum number of tokens generated on top of the prompt.
    pub max_length: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub do_sample: bool,
}

impl Default for TextGenerationParams {
    fn default() -> Self {
        Self {
            max_length: 100,
            temperature: 0.8,
            top_p: 0.9,
            top_k: 50,
            do_sample: true,
        }
    }
}

impl TextGenerationParams {
    pub fn validate(&self) -> Result<(), HoardError> {
        check_range("max_length", self.max_length, 1, 500)?;
        check_range("temperature", self.temperature, 0.1, 2.0)?;
        check_range("top_p", self.top_p, 0.1, 1.0)?;
        check_range("top_k", self.top_k, 1, 100)
    }
}

/// Text classification parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextClassificationParams {
    /// Input is truncated to this many tokens.
    pub max_length: u32,
    /// Return the full ranking instead of only the top label.
    pub return_all_scores: bool,
}

impl Default for TextClassificationParams {
    fn default() -> Self {
        Self {
            max_length: 128,
            return_all_scores: false,
        }
    }
}

impl TextClassificationParams {
    pub fn validate(&self) -> Result<(), HoardError> {
        check_range("max_length", self.max_length, 1, 512)
    }
}

/// Image classification parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageClassificationParams {
    pub top_k: u32,
    /// Predictions scoring below this are dropped from `predictions`.
    pub confidence_threshold: f32,
}

impl Default for ImageClassificationParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            confidence_threshold: 0.5,
        }
    }
}

impl ImageClassificationParams {
    pub fn validate(&self) -> Result<(), HoardError> {
        check_range("top_k", self.top_k, 1, 100)?;
        check_range("confidence_threshold", self.confidence_threshold, 0.0, 1.0)
    }
}

/// Speech recognition parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpeechRecognitionParams {
    /// `"auto"` or a lowercase ISO 639 code such as `"en"`.
    pub language: String,
    pub return_timestamps: bool,
}

impl Default for SpeechRecognitionParams {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            return_timestamps: false,
        }
    }
}

impl SpeechRecognitionParams {
    pub fn validate(&self) -> Result<(), HoardError> {
        let lang = self.language.as_str();
        let is_code = (2..=3).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_lowercase());
        if lang == "auto" || is_code {
            Ok(())
        } else {
            Err(HoardError::invalid_input(format!(
                "language must be \"auto\" or a 2-3 letter lowercase code, got {lang:?}"
            )))
        }
    }

    /// `None` means "let the pipeline detect it".
    pub fn language_hint(&self) -> Option<&str> {
        (self.language != "auto").then_some(self.language.as_str())
    }
}

/// Validated parameters for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InferenceParameters {
    TextGeneration(TextGenerationParams),
    TextClassification(TextClassificationParams),
    ImageClassification(ImageClassificationParams),
    SpeechRecognition(SpeechRecognitionParams),
}

impl InferenceParameters {
    /// Parse raw request parameters for `task`. `null` means all defaults.
    pub fn parse(task: TaskKind, raw: &serde_json::Value) -> Result<Self, HoardError> {
        let params = match task {
            TaskKind::TextGeneration => {
                let p: TextGenerationParams = decode(raw)?;
                p.validate()?;
                InferenceParameters::TextGeneration(p)
            }
            TaskKind::TextClassification => {
                let p: TextClassificationParams = decode(raw)?;
                p.validate()?;
                InferenceParameters::TextClassification(p)
            }
            TaskKind::ImageClassification => {
                let p: ImageClassificationParams = decode(raw)?;
                p.validate()?;
                InferenceParameters::ImageClassification(p)
            }
            TaskKind::SpeechRecognition => {
                let p: SpeechRecognitionParams = decode(raw)?;
                p.validate()?;
                InferenceParameters::SpeechRecognition(p)
            }
        };
        Ok(params)
    }

    pub fn defaults(task: TaskKind) -> Self {
        match task {
            TaskKind::TextGeneration => Self::TextGeneration(Default::default()),
            TaskKind::TextClassification => Self::TextClassification(Default::default()),
            TaskKind::ImageClassification => Self::ImageClassification(Default::default()),
            TaskKind::SpeechRecognition => Self::SpeechRecognition(Default::default()),
        }
    }

    pub fn task(&self) -> TaskKind {
        match self {
            InferenceParameters::TextGeneration(_) => TaskKind::TextGeneration,
            InferenceParameters::TextClassification(_) => TaskKind::TextClassification,
            InferenceParameters::ImageClassification(_) => TaskKind::ImageClassification,
            InferenceParameters::SpeechRecognition(_) => TaskKind::SpeechRecognition,
        }
    }
}

fn decode<T: DeserializeOwned + Default>(raw: &serde_json::Value) -> Result<T, HoardError> {
    if raw.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(raw.clone())
        .map_err(|e| HoardError::invalid_input(format!("parameters: {e}")))
}

fn check_range<T: PartialOrd + Display>(name: &str, value: T, min: T, max: T) -> Result<(), HoardError> {
    // NaN fails both comparisons, so it is rejected too
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(HoardError::invalid_input(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    }
}
