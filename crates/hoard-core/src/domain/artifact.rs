//! Artifact model: payload classification and the on-disk manifest.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content_hash::ContentHash;

/// How a downloaded payload should be materialized.
///
/// Classification is best effort (media type + URL suffix). A wrong guess is
/// recovered by the materializer, which falls back to a single opaque file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Zip,
    Tar,
    Opaque,
}

impl PayloadKind {
    /// Classify from the response's `content-type` header and the request URL.
    pub fn classify(content_type: Option<&str>, url: &str) -> Self {
        let media = content_type.unwrap_or("").to_ascii_lowercase();
        let url = url.to_ascii_lowercase();

        if media.contains("application/zip")
            || media.contains("application/x-zip-compressed")
            || url.ends_with(".zip")
        {
            PayloadKind::Zip
        } else if media.contains("application/x-tar")
            || media.contains("application/gzip")
            || media.contains("application/x-gzip")
            || media.contains("application/x-gtar")
            || url.ends_with(".tar")
            || url.ends_with(".tar.gz")
            || url.ends_with(".tgz")
        {
            PayloadKind::Tar
        } else {
            PayloadKind::Opaque
        }
    }

    pub fn is_archive(self) -> bool {
        !matches!(self, PayloadKind::Opaque)
    }
}

/// What actually ended up on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLayout {
    /// Archive entries were extracted into the directory.
    Extracted,
    /// The raw bytes were written as `model_file`.
    Opaque,
}

/// How much checking a cached directory gets before it is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Directory existence only.
    Off,
    /// Manifest present, file count and total size match.
    #[default]
    Shallow,
    /// Recompute the tree digest.
    Full,
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerifyMode::Off => "off",
            VerifyMode::Shallow => "shallow",
            VerifyMode::Full => "full",
        };
        f.write_str(s)
    }
}

impl FromStr for VerifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(VerifyMode::Off),
            "shallow" => Ok(VerifyMode::Shallow),
            "full" => Ok(VerifyMode::Full),
            other => Err(format!("expected off|shallow|full, got {other:?}")),
        }
    }
}

/// Record written next to every materialized artifact.
///
/// Directory presence alone is not trusted: the manifest is what makes a
/// cached directory verifiable on reuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub content_hash: ContentHash,

    /// Gateway URL that served the bytes.
    pub source_url: String,

    /// SHA-256 (hex) of the downloaded bytes.
    pub source_sha256: String,

    pub payload_kind: PayloadKind,
    pub layout: ArtifactLayout,

    /// Set when a declared archive could not be extracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,

    pub file_count: u64,
    pub total_bytes: u64,

    /// SHA-256 (hex) over the materialized tree.
    pub tree_sha256: String,

    pub materialized_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
}
