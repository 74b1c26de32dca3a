//! speech-recognition

use crate::domain::{HoardError, SpeechRecognitionParams, Transcription};
use crate::ports::{SpeechOptions, SpeechPipeline};

pub fn transcribe(
    pipeline: &dyn SpeechPipeline,
    audio: &[u8],
    params: &SpeechRecognitionParams,
) -> Result<Transcription, HoardError> {
    if audio.is_empty() {
        return Err(HoardError::invalid_input("audio input must not be empty"));
    }

    let options = SpeechOptions {
        language: params.language_hint(),
        return_timestamps: params.return_timestamps,
    };
    let mut transcription = pipeline.transcribe(audio, &options)?;
    if !params.return_timestamps {
        transcription.chunks.clear();
    }
    Ok(transcription)
}
