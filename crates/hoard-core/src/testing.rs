//! テスト用の部品（archive の組み立て、fake backend、stub store）

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;

use crate::domain::{ContentHash, HoardError, TranscriptChunk, Transcription};
use crate::ports::{
    ArtifactStore, CausalLm, GenerationConfig, ImageClassifier, ImageProcessor, ModelBackend,
    SequenceClassifier, SpeechOptions, SpeechPipeline, Tokenizer,
};

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn tar_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn tar_gz_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes(entries)).unwrap();
    encoder.finish().unwrap()
}

/// StubStore は hash ごとに空ディレクトリを返す ArtifactStore
pub struct StubStore {
    root: tempfile::TempDir,
    resolves: AtomicUsize,
    missing: Mutex<HashSet<String>>,
}

impl StubStore {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            resolves: AtomicUsize::new(0),
            missing: Mutex::new(HashSet::new()),
        }
    }

    /// この hash はどの gateway にも無いことにする
    pub fn mark_missing(&self, hash: &str) {
        self.missing.lock().insert(hash.to_string());
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for StubStore {
    async fn resolve(&self, hash: &ContentHash) -> Result<PathBuf, HoardError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.missing.lock().contains(hash.as_str()) {
            return Err(HoardError::Unavailable {
                hash: hash.to_string(),
                attempts: 1,
                last_error: "HTTP 404".to_string(),
            });
        }
        let dir = self.root.path().join(hash.as_str());
        std::fs::create_dir_all(&dir).map_err(|e| HoardError::storage(&dir, e))?;
        Ok(dir)
    }
}

/// 1 byte = 1 token の tokenizer
pub struct ByteTokenizer {
    pub pad: Option<u32>,
}

impl ByteTokenizer {
    pub const EOS: u32 = 0;
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str, truncate_to: Option<usize>) -> Result<Vec<u32>, HoardError> {
        let mut ids: Vec<u32> = text.bytes().map(u32::from).collect();
        if let Some(limit) = truncate_to {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, HoardError> {
        let bytes: Vec<u8> = ids
            .iter()
            .filter(|id| !(skip_special_tokens && **id == Self::EOS))
            .map(|id| u8::try_from(*id).map_err(|_| HoardError::inference(format!("unknown token {id}"))))
            .collect::<Result<_, _>>()?;
        String::from_utf8(bytes).map_err(|e| HoardError::inference(e.to_string()))
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(Self::EOS)
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad
    }
}

/// prompt の後に決まった続きと EOS を付ける
pub struct EchoLm {
    pub continuation: String,
    pub echo_prompt: bool,
    pub last_config: Mutex<Option<GenerationConfig>>,
}

impl EchoLm {
    pub fn new(continuation: &str) -> Self {
        Self {
            continuation: continuation.to_string(),
            echo_prompt: true,
            last_config: Mutex::new(None),
        }
    }
}

impl CausalLm for EchoLm {
    fn generate(&self, input_ids: &[u32], config: &GenerationConfig) -> Result<Vec<u32>, HoardError> {
        *self.last_config.lock() = Some(config.clone());
        let mut out = if self.echo_prompt {
            input_ids.to_vec()
        } else {
            Vec::new()
        };
        out.extend(self.continuation.bytes().map(u32::from));
        out.push(ByteTokenizer::EOS);
        Ok(out)
    }
}

/// 決まった logits を返す分類器
pub struct FixedClassifier {
    pub logits: Vec<f32>,
    pub labels: Option<Vec<String>>,
    pub last_input_len: Mutex<Option<usize>>,
}

impl FixedClassifier {
    /// label 名なし（`LABEL_{i}` になる）
    pub fn new(logits: &[f32]) -> Self {
        Self {
            logits: logits.to_vec(),
            labels: None,
            last_input_len: Mutex::new(None),
        }
    }

    pub fn labelled(logits: &[f32], labels: &[&str]) -> Self {
        Self {
            labels: Some(labels.iter().map(|s| s.to_string()).collect()),
            ..Self::new(logits)
        }
    }
}

impl SequenceClassifier for FixedClassifier {
    fn logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, HoardError> {
        *self.last_input_len.lock() = Some(input_ids.len());
        Ok(self.logits.clone())
    }

    fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }
}

impl ImageClassifier for FixedClassifier {
    fn logits(&self, pixel_values: &[f32]) -> Result<Vec<f32>, HoardError> {
        *self.last_input_len.lock() = Some(pixel_values.len());
        Ok(self.logits.clone())
    }

    fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }
}

/// 画像 bytes をそのまま画素値にする
pub struct RawPixels;

impl ImageProcessor for RawPixels {
    fn preprocess(&self, image: &[u8]) -> Result<Vec<f32>, HoardError> {
        Ok(image.iter().map(|b| f32::from(*b) / 255.0).collect())
    }
}

/// 音声の長さと言語を文字にする pipeline
pub struct FakeSpeech;

impl SpeechPipeline for FakeSpeech {
    fn transcribe(&self, audio: &[u8], options: &SpeechOptions<'_>) -> Result<Transcription, HoardError> {
        let text = format!("{} bytes in {}", audio.len(), options.language.unwrap_or("auto"));
        let chunks = if options.return_timestamps {
            vec![TranscriptChunk {
                text: text.clone(),
                start_secs: 0.0,
                end_secs: 1.5,
            }]
        } else {
            Vec::new()
        };
        Ok(Transcription { text, chunks })
    }
}

/// FakeBackend はモデル構築の回数を数える
pub struct FakeBackend {
    loads: AtomicUsize,
    fail: AtomicBool,
    fail_next: AtomicBool,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeBackend {
    pub const EOS_TOKEN: u32 = ByteTokenizer::EOS;

    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            fail_next: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// 次のモデル構築だけ delay の後に失敗させる
    pub fn fail_next_load(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// 同時に走っていたモデル構築の最大数
    pub fn max_concurrent_loads(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn set_load_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// モデル本体（tokenizer / processor を除く）の構築回数
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn check(&self, dir: &Path) -> Result<(), HoardError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HoardError::load(format!("no weights in {}", dir.display())));
        }
        Ok(())
    }

    fn count_model(&self, dir: &Path) -> Result<(), HoardError> {
        self.check(dir)?;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(HoardError::load(format!("truncated weights in {}", dir.display())));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ModelBackend for FakeBackend {
    fn load_tokenizer(&self, dir: &Path) -> Result<Arc<dyn Tokenizer>, HoardError> {
        self.check(dir)?;
        Ok(Arc::new(ByteTokenizer { pad: None }))
    }

    fn load_causal_lm(&self, dir: &Path) -> Result<Arc<dyn CausalLm>, HoardError> {
        self.count_model(dir)?;
        Ok(Arc::new(EchoLm::new(" and more")))
    }

    fn load_sequence_classifier(&self, dir: &Path) -> Result<Arc<dyn SequenceClassifier>, HoardError> {
        self.count_model(dir)?;
        Ok(Arc::new(FixedClassifier::labelled(&[0.1, 2.0], &["NEGATIVE", "POSITIVE"])))
    }

    fn load_image_processor(&self, dir: &Path) -> Result<Arc<dyn ImageProcessor>, HoardError> {
        self.check(dir)?;
        Ok(Arc::new(RawPixels))
    }

    fn load_image_classifier(&self, dir: &Path) -> Result<Arc<dyn ImageClassifier>, HoardError> {
        self.count_model(dir)?;
        Ok(Arc::new(FixedClassifier::labelled(&[3.0, 1.0, 0.5], &["cat", "dog", "fox"])))
    }

    fn load_speech_pipeline(&self, dir: &Path) -> Result<Arc<dyn SpeechPipeline>, HoardError> {
        self.count_model(dir)?;
        Ok(Arc::new(FakeSpeech))
    }
}
