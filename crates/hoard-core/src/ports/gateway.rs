//! GatewayClient port - IPFS gateway への HTTP GET
//!
//! 1 回の試行だけを表します。gateway の順序・フォールバック・タイムアウトは
//! `content::GatewayFetcher` の責務です。
//!
//! # 実装
//! - **ReqwestGatewayClient**: 本番用
//! - **InMemoryGatewayClient**: URL ごとに応答を台本化（テスト用）

use async_trait::async_trait;
use thiserror::Error;

/// 1 回の GET の結果（status に関わらず返る）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// GatewayAttemptError は 1 回の試行の失敗
#[derive(Debug, Error)]
pub enum GatewayAttemptError {
    /// 接続失敗・TLS・途中切断など
    #[error("transport error: {0}")]
    Transport(String),

    /// 宣言された / 受信した body がサイズ上限を超えた
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// GatewayClient は URL に GET を 1 回発行する
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// `max_bytes` を超える body は読み切らずに TooLarge を返すこと
    async fn get(&self, url: &str, max_bytes: u64) -> Result<GatewayResponse, GatewayAttemptError>;
}
