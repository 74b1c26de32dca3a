//! Domain model (hashes, task kinds, parameters, envelopes, errors, events).

pub mod artifact;
pub mod content_hash;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod params;
pub mod state;
pub mod task_kind;

pub use self::artifact::{ArtifactLayout, ArtifactManifest, PayloadKind, VerifyMode};
pub use self::content_hash::ContentHash;
pub use self::envelope::{ErrorEnvelope, InferenceInput, InferenceRequest, InferenceResponse};
pub use self::errors::{HoardError, Result, StatusClass};
pub use self::events::DomainEvent;
pub use self::ids::RequestId;
pub use self::outcome::{
    GeneratedText, ImageClassification, InferenceOutcome, LabelScore, TextClassification,
    TranscriptChunk, Transcription,
};
pub use self::params::{
    ImageClassificationParams, InferenceParameters, SpeechRecognitionParams,
    TextClassificationParams, TextGenerationParams,
};
pub use self::state::{EntryState, EvictionReason};
pub use self::task_kind::{CacheKey, TaskKind};
