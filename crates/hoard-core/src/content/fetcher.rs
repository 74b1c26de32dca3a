//! GatewayFetcher - 順序付き gateway リストからの取得
//!
//! # フロー
//! 1. gateway を設定順に試す（`{gateway}/{hash}`）
//! 2. 試行ごとに attempt_timeout をかける
//! 3. 200 以外・transport error・タイムアウトは warn + イベントを出して次へ
//! 4. 全滅したら `HoardError::Unavailable`
//!
//! サイズ上限超過だけは他の gateway でも同じ bytes が返るので、その場で打ち切ります。

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::domain::{ContentHash, DomainEvent, HoardError, PayloadKind};
use crate::ports::{EventSink, GatewayAttemptError, GatewayClient};

/// 取得済みの payload
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub bytes: Vec<u8>,
    pub kind: PayloadKind,
    pub source_url: String,
    /// bytes の SHA-256（hex）
    pub sha256: String,
}

/// GatewayFetcher は content hash を bytes に解決する
pub struct GatewayFetcher {
    client: Arc<dyn GatewayClient>,
    gateways: Vec<String>,
    attempt_timeout: Duration,
    max_bytes: u64,
    events: Arc<dyn EventSink>,
}

impl GatewayFetcher {
    pub fn new(
        client: Arc<dyn GatewayClient>,
        gateways: Vec<String>,
        attempt_timeout: Duration,
        max_bytes: u64,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|g| g.trim_end_matches('/').to_string())
            .filter(|g| !g.is_empty())
            .collect();
        Self {
            client,
            gateways,
            attempt_timeout,
            max_bytes,
            events,
        }
    }

    pub fn gateways(&self) -> &[String] {
        &self.gateways
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub async fn fetch(&self, hash: &ContentHash) -> Result<FetchedArtifact, HoardError> {
        let mut last_error = String::from("no gateways configured");

        for (attempt, gateway) in self.gateways.iter().enumerate() {
            let url = format!("{gateway}/{hash}");
            debug!(%hash, %url, attempt = attempt + 1, "requesting artifact");

            let outcome =
                tokio::time::timeout(self.attempt_timeout, self.client.get(&url, self.max_bytes)).await;

            let reason = match outcome {
                Err(_) => format!("timed out after {}s", self.attempt_timeout.as_secs_f64()),
                Ok(Err(GatewayAttemptError::TooLarge { limit })) => {
                    warn!(%hash, %url, limit, "artifact exceeds size limit");
                    return Err(HoardError::ArtifactTooLarge {
                        hash: hash.to_string(),
                        limit,
                    });
                }
                Ok(Err(GatewayAttemptError::Transport(message))) => message,
                Ok(Ok(response)) if response.is_ok() => {
                    if response.body.len() as u64 > self.max_bytes {
                        return Err(HoardError::ArtifactTooLarge {
                            hash: hash.to_string(),
                            limit: self.max_bytes,
                        });
                    }
                    let kind = PayloadKind::classify(response.content_type.as_deref(), &url);
                    let bytes = response.body;
                    info!(%hash, %url, bytes = bytes.len(), ?kind, "artifact downloaded");
                    self.events.emit(DomainEvent::ArtifactFetched {
                        hash: hash.clone(),
                        source_url: url.clone(),
                        bytes: bytes.len() as u64,
                    });
                    return Ok(FetchedArtifact {
                        sha256: sha256_hex(&bytes),
                        bytes,
                        kind,
                        source_url: url,
                    });
                }
                Ok(Ok(response)) => format!("HTTP {}", response.status),
            };

            warn!(%hash, %url, %reason, "gateway attempt failed");
            self.events.emit(DomainEvent::GatewayAttemptFailed {
                hash: hash.clone(),
                gateway: gateway.clone(),
                reason: reason.clone(),
            });
            last_error = reason;
        }

        Err(HoardError::Unavailable {
            hash: hash.to_string(),
            attempts: self.gateways.len(),
            last_error,
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
