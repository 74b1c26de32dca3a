//! Manifest - materialize 済みツリーの記録と検査
//!
//! manifest は `{root}/.manifests/{hash}.json` に置きます。
//! artifact ディレクトリの中には何も足さないので、モデルファイル一式は
//! gateway から来たものそのままです。
//!
//! # 検査レベル
//! - Off: 何もしない
//! - Shallow: ファイル数と合計サイズ
//! - Full: ツリー digest の再計算

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::domain::{ArtifactManifest, ContentHash, VerifyMode};

pub const MANIFEST_DIR: &str = ".manifests";

pub fn manifest_path(root: &Path, hash: &ContentHash) -> PathBuf {
    root.join(MANIFEST_DIR).join(format!("{hash}.json"))
}

/// ファイルが無ければ Ok(None)
pub fn read_manifest(path: &Path) -> io::Result<Option<ArtifactManifest>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// 一時ファイルに書いてから rename する
pub fn write_manifest(path: &Path, manifest: &ArtifactManifest) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}

/// ツリーの要約
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeSummary {
    pub file_count: u64,
    pub total_bytes: u64,
}

/// ファイル数と合計サイズだけを数える
pub fn summarize_tree(dir: &Path) -> io::Result<TreeSummary> {
    let mut summary = TreeSummary::default();
    for (_, path) in walk_files(dir)? {
        summary.file_count += 1;
        summary.total_bytes += fs::symlink_metadata(&path)?.len();
    }
    Ok(summary)
}

/// 要約と SHA-256 digest（hex）を計算する
///
/// 相対パスの昇順に「パス・NUL・サイズ・内容」を流し込むので、
/// ファイル名の変更も内容の変更も digest に現れる。
pub fn digest_tree(dir: &Path) -> io::Result<(TreeSummary, String)> {
    let mut summary = TreeSummary::default();
    let mut hasher = Sha256::new();

    for (relative, path) in walk_files(dir)? {
        let len = fs::symlink_metadata(&path)?.len();
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(len.to_le_bytes());
        io::copy(&mut File::open(&path)?, &mut hasher)?;

        summary.file_count += 1;
        summary.total_bytes += len;
    }

    Ok((summary, format!("{:x}", hasher.finalize())))
}

/// manifest と実ツリーを突き合わせる。不一致なら理由を返す
pub fn verify_tree(dir: &Path, manifest: &ArtifactManifest, mode: VerifyMode) -> Result<(), String> {
    let expected = TreeSummary {
        file_count: manifest.file_count,
        total_bytes: manifest.total_bytes,
    };

    let (actual, digest) = match mode {
        VerifyMode::Off => return Ok(()),
        VerifyMode::Shallow => (summarize_tree(dir).map_err(|e| e.to_string())?, None),
        VerifyMode::Full => {
            let (summary, digest) = digest_tree(dir).map_err(|e| e.to_string())?;
            (summary, Some(digest))
        }
    };

    if actual.file_count != expected.file_count {
        return Err(format!(
            "expected {} files, found {}",
            expected.file_count, actual.file_count
        ));
    }
    if actual.total_bytes != expected.total_bytes {
        return Err(format!(
            "expected {} bytes, found {}",
            expected.total_bytes, actual.total_bytes
        ));
    }
    if let Some(digest) = digest
        && digest != manifest.tree_sha256
    {
        return Err("tree digest mismatch".to_string());
    }
    Ok(())
}

/// 通常ファイルを (相対パス, 絶対パス) で列挙し、相対パスでソートする
///
/// シンボリックリンクは辿らない（展開時に作らせていない）。
fn walk_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| io::Error::other(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((relative, path));
            }
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}
