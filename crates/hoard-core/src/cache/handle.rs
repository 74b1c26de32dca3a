//! LoadedHandle - load 済みモデルとその部品

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{CacheKey, HoardError, TaskKind};
use crate::ports::{
    CausalLm, ImageClassifier, ImageProcessor, ModelBackend, SequenceClassifier, SpeechPipeline,
    Tokenizer,
};

/// ModelParts は task ごとに必要な部品の組
pub enum ModelParts {
    TextGeneration {
        tokenizer: Arc<dyn Tokenizer>,
        model: Arc<dyn CausalLm>,
        /// artifact の pad token、無ければ EOS
        pad_token_id: Option<u32>,
    },
    TextClassification {
        tokenizer: Arc<dyn Tokenizer>,
        model: Arc<dyn SequenceClassifier>,
    },
    ImageClassification {
        processor: Arc<dyn ImageProcessor>,
        model: Arc<dyn ImageClassifier>,
    },
    SpeechRecognition {
        pipeline: Arc<dyn SpeechPipeline>,
    },
}

impl ModelParts {
    /// dir から task に応じた部品を構築する（ブロッキング）
    pub fn build(task: TaskKind, backend: &dyn ModelBackend, dir: &Path) -> Result<Self, HoardError> {
        match task {
            TaskKind::TextGeneration => {
                let tokenizer = backend.load_tokenizer(dir)?;
                let model = backend.load_causal_lm(dir)?;
                let pad_token_id = tokenizer.pad_token_id().or(tokenizer.eos_token_id());
                Ok(ModelParts::TextGeneration {
                    tokenizer,
                    model,
                    pad_token_id,
                })
            }
            TaskKind::TextClassification => Ok(ModelParts::TextClassification {
                tokenizer: backend.load_tokenizer(dir)?,
                model: backend.load_sequence_classifier(dir)?,
            }),
            TaskKind::ImageClassification => Ok(ModelParts::ImageClassification {
                processor: backend.load_image_processor(dir)?,
                model: backend.load_image_classifier(dir)?,
            }),
            TaskKind::SpeechRecognition => Ok(ModelParts::SpeechRecognition {
                pipeline: backend.load_speech_pipeline(dir)?,
            }),
        }
    }

    pub fn task(&self) -> TaskKind {
        match self {
            ModelParts::TextGeneration { .. } => TaskKind::TextGeneration,
            ModelParts::TextClassification { .. } => TaskKind::TextClassification,
            ModelParts::ImageClassification { .. } => TaskKind::ImageClassification,
            ModelParts::SpeechRecognition { .. } => TaskKind::SpeechRecognition,
        }
    }
}

impl fmt::Debug for ModelParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelParts").field("task", &self.task()).finish_non_exhaustive()
    }
}

/// LoadedHandle はキャッシュに載る 1 エントリ
///
/// 呼び出し側は `Arc<LoadedHandle>` を受け取るので、
/// 推論中に evict されても handle 自体は生き続ける。
#[derive(Debug)]
pub struct LoadedHandle {
    key: CacheKey,
    dir: PathBuf,
    parts: ModelParts,
    loaded_at: DateTime<Utc>,
    last_used: Mutex<DateTime<Utc>>,
}

impl LoadedHandle {
    pub fn new(key: CacheKey, dir: PathBuf, parts: ModelParts, loaded_at: DateTime<Utc>) -> Self {
        Self {
            key,
            dir,
            parts,
            loaded_at,
            last_used: Mutex::new(loaded_at),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn task(&self) -> TaskKind {
        self.key.task
    }

    /// materialize 済みディレクトリ
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn parts(&self) -> &ModelParts {
        &self.parts
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock()
    }

    pub(crate) fn touch(&self, now: DateTime<Utc>) {
        let mut last_used = self.last_used.lock();
        if now > *last_used {
            *last_used = now;
        }
    }
}
