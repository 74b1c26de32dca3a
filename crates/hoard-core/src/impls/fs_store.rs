//! FsArtifactStore - ローカルディスク上の content store
//!
//! # レイアウト
//! ```text
//! {root}/
//!   {hash}/                 確定済み artifact
//!   .manifests/{hash}.json  manifest
//!   .partial-XXXX/          materialize 中の作業ディレクトリ
//! ```
//!
//! # 不変条件
//! - `{root}/{hash}` は rename で一度に現れる（途中状態は見えない）
//! - manifest は rename より先に書く
//! - 同じ hash の resolve は KeyedLocks で直列化される
//! - lock はブロッキング処理の閉包に持たせるので、呼び出し側が cancel されても展開が終わるまで解放されない
//! - 起動時に残っている `.partial-*` はクラッシュの残骸なので削除する

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::content::manifest::{self, MANIFEST_DIR};
use crate::content::{FetchedArtifact, GatewayFetcher, KeyGuard, KeyedLocks, Materialized, materialize};
use crate::domain::{ArtifactManifest, ContentHash, DomainEvent, HoardError, VerifyMode};
use crate::ports::{ArtifactStore, Clock, EventSink};

/// 作業ディレクトリの接頭辞
pub const PARTIAL_PREFIX: &str = ".partial-";

/// 一時ディレクトリ内で展開先にするサブディレクトリ名
const STAGING_SUBDIR: &str = "artifact";

/// 単発の verify の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// ディレクトリが無い
    Missing,
    Valid { manifest: ArtifactManifest },
    Corrupt { reason: String },
}

/// 累積カウンタのスナップショット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreStats {
    /// gateway から取得して materialize した回数
    pub fetches: u64,
    /// 既存ディレクトリを再利用した回数
    pub reuses: u64,
    /// archive 展開に失敗して単一ファイルにした回数
    pub fallbacks: u64,
    /// 再利用前の検査で破棄した回数
    pub integrity_failures: u64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    fetches: AtomicU64,
    reuses: AtomicU64,
    fallbacks: AtomicU64,
    integrity_failures: AtomicU64,
}

impl StoreCounters {
    fn snapshot(&self) -> StoreStats {
        StoreStats {
            fetches: self.fetches.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
        }
    }
}

/// FsArtifactStore は content hash をローカルディレクトリに解決する
pub struct FsArtifactStore {
    root: PathBuf,
    fetcher: GatewayFetcher,
    verify_mode: VerifyMode,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    locks: KeyedLocks<ContentHash>,
    counters: StoreCounters,
}

impl FsArtifactStore {
    /// root を作成し、前回の作業ディレクトリを掃除する
    pub fn open(
        root: impl Into<PathBuf>,
        fetcher: GatewayFetcher,
        verify_mode: VerifyMode,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, HoardError> {
        let root = root.into();
        let manifests = root.join(MANIFEST_DIR);
        fs::create_dir_all(&manifests).map_err(|e| HoardError::storage(&manifests, e))?;

        let swept = sweep_partials(&root)?;
        if swept > 0 {
            info!(root = %root.display(), swept, "removed leftover partial directories");
        }

        Ok(Self {
            root,
            fetcher,
            verify_mode,
            clock,
            events,
            locks: KeyedLocks::new(),
            counters: StoreCounters::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    pub fn artifact_dir(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }

    /// manifest と突き合わせて full 検査する（破棄はしない）
    pub async fn verify(&self, hash: &ContentHash) -> Result<VerifyOutcome, HoardError> {
        let guard = Arc::new(self.locks.lock(hash).await);
        let dir = self.artifact_dir(hash);
        let manifest_path = manifest::manifest_path(&self.root, hash);
        let hash = hash.clone();

        blocking_held(&guard, move || {
            if !dir.is_dir() {
                return Ok(VerifyOutcome::Missing);
            }
            Ok(match check_against_manifest(&hash, &dir, &manifest_path, VerifyMode::Full) {
                Ok(manifest) => VerifyOutcome::Valid { manifest },
                Err(reason) => VerifyOutcome::Corrupt { reason },
            })
        })
        .await
    }

    /// 確定済み artifact の manifest 一覧（hash 順）
    pub async fn list(&self) -> Result<Vec<ArtifactManifest>, HoardError> {
        let root = self.root.clone();
        blocking(move || list_manifests(&root)).await
    }

    /// 既存ディレクトリが使えるなら Some(dir)。使えなければ破棄して None
    async fn reuse(&self, hash: &ContentHash, guard: &HashGuard) -> Result<Option<PathBuf>, HoardError> {
        let dir = self.artifact_dir(hash);
        let manifest_path = manifest::manifest_path(&self.root, hash);
        let mode = self.verify_mode;
        let now = self.clock.now();
        let owned_hash = hash.clone();

        let checked = blocking_held(guard, move || {
            if !dir.is_dir() {
                return Ok(None);
            }
            if mode == VerifyMode::Off {
                return Ok(Some(Ok(dir)));
            }
            match check_against_manifest(&owned_hash, &dir, &manifest_path, mode) {
                Ok(mut manifest) => {
                    if mode == VerifyMode::Full {
                        manifest.last_verified_at = now;
                        manifest::write_manifest(&manifest_path, &manifest)
                            .map_err(|e| HoardError::storage(&manifest_path, e))?;
                    }
                    Ok(Some(Ok(dir)))
                }
                Err(reason) => {
                    remove_artifact(&dir, &manifest_path)?;
                    Ok(Some(Err(reason)))
                }
            }
        })
        .await?;

        match checked {
            None => Ok(None),
            Some(Ok(dir)) => {
                self.counters.reuses.fetch_add(1, Ordering::Relaxed);
                debug!(%hash, dir = %dir.display(), "reusing cached artifact");
                Ok(Some(dir))
            }
            Some(Err(reason)) => {
                self.counters.integrity_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%hash, %reason, "cached artifact failed verification, refetching");
                self.events.emit(DomainEvent::IntegrityCheckFailed {
                    hash: hash.clone(),
                    reason,
                });
                Ok(None)
            }
        }
    }

    /// 作業ディレクトリに展開し、manifest を書いてから rename で確定する
    async fn commit(
        &self,
        hash: &ContentHash,
        fetched: FetchedArtifact,
        guard: &HashGuard,
    ) -> Result<PathBuf, HoardError> {
        let root = self.root.clone();
        let dest = self.artifact_dir(hash);
        let manifest_path = manifest::manifest_path(&self.root, hash);
        let max_bytes = self.fetcher.max_bytes();
        let now = self.clock.now();
        let owned_hash = hash.clone();

        let (manifest, materialized) = blocking_held(guard, move || {
            let staging = tempfile::Builder::new()
                .prefix(PARTIAL_PREFIX)
                .tempdir_in(&root)
                .map_err(|e| HoardError::storage(&root, e))?;
            let work = staging.path().join(STAGING_SUBDIR);

            let materialized = materialize(&fetched.bytes, fetched.kind, &work, max_bytes)?;
            let (summary, tree_sha256) =
                manifest::digest_tree(&work).map_err(|e| HoardError::storage(&work, e))?;

            let manifest = ArtifactManifest {
                content_hash: owned_hash,
                source_url: fetched.source_url,
                source_sha256: fetched.sha256,
                payload_kind: fetched.kind,
                layout: materialized.layout,
                fallback_reason: materialized.fallback_reason.clone(),
                file_count: summary.file_count,
                total_bytes: summary.total_bytes,
                tree_sha256,
                materialized_at: now,
                last_verified_at: now,
            };
            manifest::write_manifest(&manifest_path, &manifest)
                .map_err(|e| HoardError::storage(&manifest_path, e))?;

            if dest.exists() {
                fs::remove_dir_all(&dest).map_err(|e| HoardError::storage(&dest, e))?;
            }
            fs::rename(&work, &dest).map_err(|e| HoardError::storage(&dest, e))?;
            Ok((manifest, materialized))
        })
        .await?;

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        if let Materialized {
            fallback_reason: Some(reason),
            ..
        } = materialized
        {
            self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            warn!(%hash, declared = ?manifest.payload_kind, %reason, "archive extraction failed, stored as a single file");
            self.events.emit(DomainEvent::ExtractionFallback {
                hash: hash.clone(),
                declared: manifest.payload_kind,
                reason,
            });
        }

        info!(
            %hash,
            layout = ?manifest.layout,
            files = manifest.file_count,
            bytes = manifest.total_bytes,
            "artifact materialized"
        );
        self.events.emit(DomainEvent::ArtifactMaterialized {
            hash: hash.clone(),
            layout: manifest.layout,
            total_bytes: manifest.total_bytes,
        });

        Ok(self.artifact_dir(hash))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn resolve(&self, hash: &ContentHash) -> Result<PathBuf, HoardError> {
        let guard = Arc::new(self.locks.lock(hash).await);

        if let Some(dir) = self.reuse(hash, &guard).await? {
            return Ok(dir);
        }

        let fetched = self.fetcher.fetch(hash).await?;
        self.commit(hash, fetched, &guard).await
    }
}

/// ブロッキング I/O を spawn_blocking で実行する
async fn blocking<T, F>(f: F) -> Result<T, HoardError>
where
    F: FnOnce() -> Result<T, HoardError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HoardError::Storage(format!("blocking task failed: {e}")))?
}

type HashGuard = Arc<KeyGuard<ContentHash>>;

/// hash の lock を閉包に持たせて spawn_blocking する
async fn blocking_held<T, F>(guard: &HashGuard, f: F) -> Result<T, HoardError>
where
    F: FnOnce() -> Result<T, HoardError> + Send + 'static,
    T: Send + 'static,
{
    let guard = Arc::clone(guard);
    blocking(move || {
        let _guard = guard;
        f()
    })
    .await
}

/// manifest を読み、hash と mode に応じた検査を通れば返す
fn check_against_manifest(
    hash: &ContentHash,
    dir: &Path,
    manifest_path: &Path,
    mode: VerifyMode,
) -> Result<ArtifactManifest, String> {
    let manifest = manifest::read_manifest(manifest_path)
        .map_err(|e| format!("unreadable manifest: {e}"))?
        .ok_or_else(|| "manifest missing".to_string())?;
    if &manifest.content_hash != hash {
        return Err(format!("manifest belongs to {}", manifest.content_hash));
    }
    manifest::verify_tree(dir, &manifest, mode)?;
    Ok(manifest)
}

fn remove_artifact(dir: &Path, manifest_path: &Path) -> Result<(), HoardError> {
    fs::remove_dir_all(dir).map_err(|e| HoardError::storage(dir, e))?;
    match fs::remove_file(manifest_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HoardError::storage(manifest_path, e)),
    }
}

fn sweep_partials(root: &Path) -> Result<usize, HoardError> {
    let mut swept = 0;
    for entry in fs::read_dir(root).map_err(|e| HoardError::storage(root, e))? {
        let entry = entry.map_err(|e| HoardError::storage(root, e))?;
        if entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
            let path = entry.path();
            fs::remove_dir_all(&path).map_err(|e| HoardError::storage(&path, e))?;
            swept += 1;
        }
    }
    Ok(swept)
}

fn list_manifests(root: &Path) -> Result<Vec<ArtifactManifest>, HoardError> {
    let dir = root.join(MANIFEST_DIR);
    let mut manifests = Vec::new();

    for entry in fs::read_dir(&dir).map_err(|e| HoardError::storage(&dir, e))? {
        let path = entry.map_err(|e| HoardError::storage(&dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match manifest::read_manifest(&path) {
            Ok(Some(manifest)) if root.join(manifest.content_hash.as_str()).is_dir() => {
                manifests.push(manifest);
            }
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable manifest"),
        }
    }

    manifests.sort_by(|a, b| a.content_hash.as_str().cmp(b.content_hash.as_str()));
    Ok(manifests)
}
