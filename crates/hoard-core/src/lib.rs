//! hoard-core
//!
//! IPFS 上のモデル artifact を取得してローカルに保持し、
//! load 済みモデルで推論するためのコア部品。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（content hash, task, params, envelope, outcome, errors, events）
//! - **ports**: 抽象化レイヤー（GatewayClient, ArtifactStore, ModelBackend, Clock, EventSink）
//! - **content**: gateway fetch / archive 展開 / manifest / per-hash lock
//! - **cache**: (hash, task) 単位の load 済みモデルキャッシュ
//! - **inference**: task ごとの推論と結果の正規化
//! - **impls**: 実装（reqwest gateway, ディスク store, event sink, テスト用 gateway）
//! - **app**: ワイヤリングと推論の入口
//! - **config**: 環境変数からの設定

pub mod app;
pub mod cache;
pub mod config;
pub mod content;
pub mod domain;
pub mod impls;
pub mod inference;
pub mod ports;

#[cfg(test)]
mod testing;
