//! InMemoryGatewayClient - 開発・テスト用の GatewayClient
//!
//! URL ごとに応答を台本化し、呼ばれた URL を記録します。
//! 台本にない URL は 404 を返します。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ports::{GatewayAttemptError, GatewayClient, GatewayResponse};

/// ScriptedResponse は 1 つの URL に対する振る舞い
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// 指定の応答を返す（delay だけ待ってから）
    Respond {
        response: GatewayResponse,
        delay: Duration,
    },
    /// transport error
    Fail(String),
    /// 応答しない（タイムアウト検証用）
    Hang,
}

/// InMemoryGatewayClient は台本どおりに応答する
#[derive(Debug, Default)]
pub struct InMemoryGatewayClient {
    routes: Mutex<HashMap<String, ScriptedResponse>>,
    calls: Mutex<Vec<String>>,
}

impl InMemoryGatewayClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: impl Into<String>, behavior: ScriptedResponse) {
        self.routes.lock().insert(url.into(), behavior);
    }

    /// 200 + body
    pub fn respond_ok(&self, url: impl Into<String>, content_type: Option<&str>, body: Vec<u8>) {
        self.respond_ok_after(url, content_type, body, Duration::ZERO);
    }

    pub fn respond_ok_after(
        &self,
        url: impl Into<String>,
        content_type: Option<&str>,
        body: Vec<u8>,
        delay: Duration,
    ) {
        self.script(
            url,
            ScriptedResponse::Respond {
                response: GatewayResponse {
                    status: 200,
                    content_type: content_type.map(str::to_string),
                    body,
                },
                delay,
            },
        );
    }

    /// 任意の status（body なし）
    pub fn respond_status(&self, url: impl Into<String>, status: u16) {
        self.script(
            url,
            ScriptedResponse::Respond {
                response: GatewayResponse {
                    status,
                    content_type: None,
                    body: Vec::new(),
                },
                delay: Duration::ZERO,
            },
        );
    }

    pub fn fail(&self, url: impl Into<String>, message: impl Into<String>) {
        self.script(url, ScriptedResponse::Fail(message.into()));
    }

    pub fn hang(&self, url: impl Into<String>) {
        self.script(url, ScriptedResponse::Hang);
    }

    /// 呼ばれた URL（呼び出し順）
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl GatewayClient for InMemoryGatewayClient {
    async fn get(&self, url: &str, max_bytes: u64) -> Result<GatewayResponse, GatewayAttemptError> {
        self.calls.lock().push(url.to_string());
        let behavior = self.routes.lock().get(url).cloned();

        match behavior {
            None => Ok(GatewayResponse {
                status: 404,
                content_type: None,
                body: Vec::new(),
            }),
            Some(ScriptedResponse::Respond { response, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if response.is_ok() && response.body.len() as u64 > max_bytes {
                    return Err(GatewayAttemptError::TooLarge { limit: max_bytes });
                }
                Ok(response)
            }
            Some(ScriptedResponse::Fail(message)) => Err(GatewayAttemptError::Transport(message)),
            Some(ScriptedResponse::Hang) => std::future::pending().await,
        }
    }
}
