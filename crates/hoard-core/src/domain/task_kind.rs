//! TaskKind - 推論モダリティの閉じた列挙
//!
//! 文字列比較による dispatch をやめ、未知の task は parse の時点で弾きます。
//! 以降のコードは `match` の網羅性チェックに頼れます。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::content_hash::ContentHash;
use super::errors::HoardError;

/// TaskKind は artifact の load 方法と推論ルーチンを決める
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    TextGeneration,
    TextClassification,
    ImageClassification,
    SpeechRecognition,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::TextGeneration,
        TaskKind::TextClassification,
        TaskKind::ImageClassification,
        TaskKind::SpeechRecognition,
    ];

    /// wire 上の名前（kebab-case）
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::TextGeneration => "text-generation",
            TaskKind::TextClassification => "text-classification",
            TaskKind::ImageClassification => "image-classification",
            TaskKind::SpeechRecognition => "speech-recognition",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = HoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HoardError::UnsupportedTask(s.to_string()))
    }
}

/// CacheKey は (ContentHash, TaskKind) の複合キー
///
/// 同じ hash でも task が違えば別エントリ（同じモデルが二重に load されうる）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: ContentHash,
    pub task: TaskKind,
}

impl CacheKey {
    pub fn new(hash: ContentHash, task: TaskKind) -> Self {
        Self { hash, task }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.hash, self.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("text-generation", TaskKind::TextGeneration)]
    #[case("text-classification", TaskKind::TextClassification)]
    #[case("image-classification", TaskKind::ImageClassification)]
    #[case("speech-recognition", TaskKind::SpeechRecognition)]
    fn parses_wire_names(#[case] raw: &str, #[case] expected: TaskKind) {
        assert_eq!(raw.parse::<TaskKind>().unwrap(), expected);
        assert_eq!(expected.to_string(), raw);
    }

    #[rstest]
    #[case::other_task("translation")]
    #[case::wrong_case("Text-Generation")]
    #[case::snake_case("text_generation")]
    #[case::empty("")]
    fn unknown_names_are_unsupported(#[case] raw: &str) {
        let err = raw.parse::<TaskKind>().unwrap_err();
        assert!(matches!(err, HoardError::UnsupportedTask(ref t) if t == raw));
    }

    #[test]
    fn serde_uses_wire_names() {
        let s = serde_json::to_string(&TaskKind::SpeechRecognition).unwrap();
        assert_eq!(s, "\"speech-recognition\"");
    }

    #[test]
    fn cache_keys_differ_per_task() {
        let hash = ContentHash::parse("QmAbc").unwrap();
        let a = CacheKey::new(hash.clone(), TaskKind::TextGeneration);
        let b = CacheKey::new(hash, TaskKind::TextClassification);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "QmAbc_text-generation");
    }
}
