//! Materializer - payload をディレクトリに展開する
//!
//! - zip: エントリ名を検査してから展開（`..` や絶対パスは拒否）
//! - tar: 先頭が gzip magic なら gunzip してから展開、それ以外は素の tar
//! - その他: `model_file` という単一ファイルとして保存
//!
//! 宣言どおりに展開できなかった場合は dest を空にしてから単一ファイルに
//! 切り替え、理由を `Materialized::fallback_reason` で返します。
//! ここは同期 I/O なので呼び出し側が spawn_blocking で包みます。

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::domain::{ArtifactLayout, HoardError, PayloadKind};

/// 展開できなかった payload の保存名
pub const OPAQUE_FILE_NAME: &str = "model_file";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// materialize の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub layout: ArtifactLayout,
    /// archive と宣言されていたのに展開できなかった理由
    pub fallback_reason: Option<String>,
}

/// bytes を dest に展開する
///
/// `max_expanded_bytes` は展開後の合計サイズの上限。超えたら展開失敗として扱う。
/// dest への書き込み自体ができない場合だけ `HoardError::Storage` を返す。
pub fn materialize(
    bytes: &[u8],
    kind: PayloadKind,
    dest: &Path,
    max_expanded_bytes: u64,
) -> Result<Materialized, HoardError> {
    fs::create_dir_all(dest).map_err(|e| HoardError::storage(dest, e))?;

    // 中身が archive でも宣言が opaque なら展開しない
    if !kind.is_archive() {
        write_opaque(bytes, dest)?;
        return Ok(Materialized {
            layout: ArtifactLayout::Opaque,
            fallback_reason: None,
        });
    }

    let extracted = if kind == PayloadKind::Zip {
        extract_zip(bytes, dest, max_expanded_bytes)
    } else {
        extract_tar(bytes, dest, max_expanded_bytes)
    };

    match extracted {
        Ok(()) => Ok(Materialized {
            layout: ArtifactLayout::Extracted,
            fallback_reason: None,
        }),
        Err(reason) => {
            clear_dir(dest)?;
            write_opaque(bytes, dest)?;
            Ok(Materialized {
                layout: ArtifactLayout::Opaque,
                fallback_reason: Some(reason),
            })
        }
    }
}

fn extract_zip(bytes: &[u8], dest: &Path, limit: u64) -> Result<(), String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut remaining = limit;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| e.to_string())?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(format!("entry {:?} escapes the destination", entry.name()));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| e.to_string())?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let mut file = File::create(&target).map_err(|e| e.to_string())?;
        copy_limited(&mut entry, &mut file, &mut remaining, limit)?;
    }

    Ok(())
}

fn extract_tar(bytes: &[u8], dest: &Path, limit: u64) -> Result<(), String> {
    let reader: Box<dyn Read + '_> = if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    let mut archive = tar::Archive::new(reader);
    let mut remaining = limit;
    let mut unpacked_entries = 0usize;

    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let entry_type = entry.header().entry_type();

        if entry_type == tar::EntryType::XGlobalHeader {
            continue;
        }
        if !entry_type.is_file() && !entry_type.is_dir() {
            return Err(format!(
                "unsupported entry type {:?} at {}",
                entry_type,
                entry_path(&entry)
            ));
        }

        let size = entry.header().size().map_err(|e| e.to_string())?;
        if size > remaining {
            return Err(format!("expanded size exceeds {limit} bytes"));
        }
        remaining -= size;

        let inside = entry.unpack_in(dest).map_err(|e| e.to_string())?;
        if !inside {
            return Err(format!("entry {} escapes the destination", entry_path(&entry)));
        }
        unpacked_entries += 1;
    }

    if unpacked_entries == 0 {
        return Err("archive contains no entries".to_string());
    }
    Ok(())
}

fn entry_path<R: Read>(entry: &tar::Entry<'_, R>) -> String {
    entry
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "<unreadable path>".to_string())
}

fn copy_limited(
    reader: &mut impl Read,
    writer: &mut impl Write,
    remaining: &mut u64,
    limit: u64,
) -> Result<(), String> {
    let copied = io::copy(&mut reader.by_ref().take(remaining.saturating_add(1)), writer)
        .map_err(|e| e.to_string())?;
    if copied > *remaining {
        return Err(format!("expanded size exceeds {limit} bytes"));
    }
    *remaining -= copied;
    Ok(())
}

fn write_opaque(bytes: &[u8], dest: &Path) -> Result<(), HoardError> {
    let path = dest.join(OPAQUE_FILE_NAME);
    fs::write(&path, bytes).map_err(|e| HoardError::storage(&path, e))
}

fn clear_dir(dir: &Path) -> Result<(), HoardError> {
    fs::remove_dir_all(dir).map_err(|e| HoardError::storage(dir, e))?;
    fs::create_dir_all(dir).map_err(|e| HoardError::storage(dir, e))
}
