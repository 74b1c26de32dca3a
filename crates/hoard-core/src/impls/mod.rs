//! Impls - ports の実装
//!
//! # 本番用
//! - **ReqwestGatewayClient**: HTTP で IPFS gateway から取得
//! - **FsArtifactStore**: ローカルディスク上の content store
//! - **TracingEventSink**: イベントを構造化ログに流す
//!
//! # 開発・テスト用
//! - **InMemoryGatewayClient**: URL ごとに応答を台本化
//! - **MemoryEventSink**: イベントをメモリに貯める
//!
//! ModelBackend の本番実装（推論エンジンとの接続）はこのクレートに含めません。

pub mod event_sink;
pub mod fs_store;
pub mod http_gateway;
pub mod inmem_gateway;

// 主要な型を再エクスポート
pub use self::event_sink::{MemoryEventSink, TracingEventSink};
pub use self::fs_store::{FsArtifactStore, PARTIAL_PREFIX, StoreStats, VerifyOutcome};
pub use self::http_gateway::ReqwestGatewayClient;
pub use self::inmem_gateway::{InMemoryGatewayClient, ScriptedResponse};
