//! Content - artifact の取得と materialize
//!
//! - **GatewayFetcher**: gateway を順に試して bytes を得る
//! - **materializer**: bytes をディレクトリに展開する（失敗時は単一ファイル）
//! - **manifest**: 展開済みツリーの記録と検査
//! - **KeyedLocks**: 同一 hash の resolve を直列化する

pub mod fetcher;
pub mod keyed_lock;
pub mod manifest;
pub mod materializer;

pub use self::fetcher::{FetchedArtifact, GatewayFetcher, sha256_hex};
pub use self::keyed_lock::{KeyGuard, KeyedLocks};
pub use self::manifest::{TreeSummary, digest_tree, manifest_path, verify_tree};
pub use self::materializer::{Materialized, OPAQUE_FILE_NAME, materialize};
