//! Config - 環境変数からの設定読み込み
//!
//! 環境変数の読み取りは `EnvSource` trait 越しに行うので、
//! テストはプロセス環境を書き換えずに HashMap を渡せます。
//!
//! | 変数 | default |
//! |---|---|
//! | `HOARD_CACHE_DIR` | `/tmp/hoard_models` |
//! | `HOARD_GATEWAY` | `https://gateway.pinata.cloud/ipfs` |
//! | `HOARD_FALLBACK_GATEWAYS` | `https://ipfs.io/ipfs,https://cloudflare-ipfs.com/ipfs` |
//! | `HOARD_FETCH_TIMEOUT_SECS` | `300` |
//! | `HOARD_REQUEST_TIMEOUT_SECS` | `600` |
//! | `HOARD_MAX_ARTIFACT_BYTES` | `5368709120` |
//! | `HOARD_ALLOWED_ORIGINS` | `*` |
//! | `HOARD_MAX_LOADED_MODELS` | `4` |
//! | `HOARD_IDLE_TTL_SECS` | `1800`（0 で無効） |
//! | `HOARD_REAPER_INTERVAL_SECS` | `60` |
//! | `HOARD_VERIFY_ON_REUSE` | `shallow` |

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::domain::VerifyMode;

pub const DEFAULT_CACHE_DIR: &str = "/tmp/hoard_models";
pub const DEFAULT_GATEWAY: &str = "https://gateway.pinata.cloud/ipfs";
pub const DEFAULT_FALLBACK_GATEWAYS: &str = "https://ipfs.io/ipfs,https://cloudflare-ipfs.com/ipfs";
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// EnvSource は環境変数の読み取り元
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// プロセス環境から読む
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("no gateways configured (set HOARD_GATEWAY or HOARD_FALLBACK_GATEWAYS)")]
    NoGateways,
}

/// HoardConfig は起動時に一度だけ読む設定
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoardConfig {
    pub cache_dir: PathBuf,
    /// 試す順（primary が先頭）
    pub gateways: Vec<String>,
    pub fetch_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_artifact_bytes: u64,
    /// HTTP 層が CORS に使う。このクレートでは保持するだけ
    pub allowed_origins: Vec<String>,
    pub max_loaded_models: usize,
    /// 0 は idle eviction 無効
    pub idle_ttl_secs: u64,
    pub reaper_interval_secs: u64,
    pub verify_on_reuse: VerifyMode,
}

impl Default for HoardConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            gateways: std::iter::once(DEFAULT_GATEWAY)
                .chain(DEFAULT_FALLBACK_GATEWAYS.split(','))
                .map(str::to_string)
                .collect(),
            fetch_timeout_secs: 300,
            request_timeout_secs: 600,
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            allowed_origins: vec!["*".to_string()],
            max_loaded_models: 4,
            idle_ttl_secs: 30 * 60,
            reaper_interval_secs: 60,
            verify_on_reuse: VerifyMode::Shallow,
        }
    }
}

impl HoardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&OsEnv)
    }

    pub fn from_source(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let primary = env
            .var("HOARD_GATEWAY")
            .unwrap_or_else(|| DEFAULT_GATEWAY.to_string());
        let fallbacks = env
            .var("HOARD_FALLBACK_GATEWAYS")
            .unwrap_or_else(|| DEFAULT_FALLBACK_GATEWAYS.to_string());
        let gateways: Vec<String> = split_list(&primary)
            .into_iter()
            .chain(split_list(&fallbacks))
            .map(|g| g.trim_end_matches('/').to_string())
            .collect();
        if gateways.is_empty() {
            return Err(ConfigError::NoGateways);
        }

        let config = Self {
            cache_dir: env
                .var("HOARD_CACHE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            gateways,
            fetch_timeout_secs: positive(env, "HOARD_FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs)?,
            request_timeout_secs: positive(env, "HOARD_REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            max_artifact_bytes: positive(env, "HOARD_MAX_ARTIFACT_BYTES", defaults.max_artifact_bytes)?,
            allowed_origins: env
                .var("HOARD_ALLOWED_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.allowed_origins),
            max_loaded_models: parsed(env, "HOARD_MAX_LOADED_MODELS", defaults.max_loaded_models)?,
            idle_ttl_secs: parsed(env, "HOARD_IDLE_TTL_SECS", defaults.idle_ttl_secs)?,
            reaper_interval_secs: positive(env, "HOARD_REAPER_INTERVAL_SECS", defaults.reaper_interval_secs)?,
            verify_on_reuse: parsed(env, "HOARD_VERIFY_ON_REUSE", defaults.verify_on_reuse)?,
        };
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parsed<T>(env: &dyn EnvSource, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env.var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn positive(env: &dyn EnvSource, name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let value = parsed(env, name, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
