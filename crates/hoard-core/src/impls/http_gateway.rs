//! ReqwestGatewayClient - 本番用の GatewayClient

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::ports::{GatewayAttemptError, GatewayClient, GatewayResponse};

/// 先に確保する body バッファの上限（content-length が巨大でも一度に確保しない）
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// ReqwestGatewayClient は reqwest で GET を 1 回発行する
///
/// タイムアウトは GatewayFetcher が試行ごとにかけるので、client 側では設定しない。
#[derive(Debug, Clone)]
pub struct ReqwestGatewayClient {
    client: reqwest::Client,
}

impl ReqwestGatewayClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hoard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// 設定済みの reqwest::Client を使う（proxy や証明書を差し替えたいとき）
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GatewayClient for ReqwestGatewayClient {
    async fn get(&self, url: &str, max_bytes: u64) -> Result<GatewayResponse, GatewayAttemptError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayAttemptError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status != 200 {
            return Ok(GatewayResponse {
                status,
                content_type,
                body: Vec::new(),
            });
        }

        let declared = response.content_length();
        if let Some(len) = declared
            && len > max_bytes
        {
            return Err(GatewayAttemptError::TooLarge { limit: max_bytes });
        }

        let mut body = Vec::with_capacity(declared.unwrap_or(0).min(MAX_PREALLOC) as usize);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| GatewayAttemptError::Transport(e.to_string()))?
        {
            if body.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(GatewayAttemptError::TooLarge { limit: max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, bytes = body.len(), "gateway body received");
        Ok(GatewayResponse {
            status,
            content_type,
            body,
        })
    }
}
