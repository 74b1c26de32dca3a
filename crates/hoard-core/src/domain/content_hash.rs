//! ContentHash - IPFS CID の newtype
//!
//! CID はキャッシュディレクトリ名としてそのまま使うので、
//! パス区切りや `..` を含まない単一コンポーネントであることを構築時に保証します。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::HoardError;

const MAX_LEN: usize = 256;

/// ContentHash は不変の content identifier
///
/// # 検証ルール
/// - 空でない、256 bytes 以下
/// - `[A-Za-z0-9._-]` のみ
/// - 先頭が `.` ではない（隠しファイル / `..` を排除）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(value: impl Into<String>) -> Result<Self, HoardError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HoardError::invalid_input("content hash must not be empty"));
        }
        if value.len() > MAX_LEN {
            return Err(HoardError::invalid_input(format!(
                "content hash is longer than {MAX_LEN} bytes"
            )));
        }
        if value.starts_with('.') {
            return Err(HoardError::invalid_input(format!(
                "content hash must not start with '.': {value}"
            )));
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(HoardError::invalid_input(format!(
                "content hash contains invalid character {bad:?}: {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ContentHash {
    type Err = HoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HoardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}
