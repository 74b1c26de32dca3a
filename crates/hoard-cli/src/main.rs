use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hoard_core::app::open_store;
use hoard_core::config::HoardConfig;
use hoard_core::domain::{ContentHash, VerifyMode};
use hoard_core::impls::{FsArtifactStore, ReqwestGatewayClient, TracingEventSink};
use hoard_core::ports::{ArtifactStore, SystemClock};

/// IPFS 上のモデル artifact をローカルの content store で管理する
#[derive(Debug, Parser)]
#[command(name = "hoard", version)]
struct Cli {
    /// HOARD_CACHE_DIR を上書き
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// artifact を取得して展開する（既にあれば再利用）
    Fetch {
        hashes: Vec<String>,
        /// 再利用時の検査方法を上書き（off / shallow / full）
        #[arg(long)]
        verify: Option<VerifyMode>,
    },
    /// 展開済み artifact を manifest と突き合わせる
    Verify { hashes: Vec<String> },
    /// 展開済み artifact の manifest 一覧
    List,
    /// 有効な設定を表示
    Config,
}

#[derive(Debug, Serialize)]
struct Fetched {
    hash: String,
    path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = HoardConfig::from_env().context("invalid configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    match cli.command {
        Command::Config => print_json(&config),
        Command::Fetch { hashes, verify } => {
            if let Some(mode) = verify {
                config.verify_on_reuse = mode;
            }
            let store = store(&config)?;
            let mut fetched = Vec::with_capacity(hashes.len());
            for raw in hashes {
                let hash = parse_hash(raw)?;
                let path = store
                    .resolve(&hash)
                    .await
                    .with_context(|| format!("failed to fetch {hash}"))?;
                info!(%hash, path = %path.display(), "artifact ready");
                fetched.push(Fetched {
                    hash: hash.to_string(),
                    path,
                });
            }
            print_json(&fetched)
        }
        Command::Verify { hashes } => {
            let store = store(&config)?;
            let mut reports = Vec::with_capacity(hashes.len());
            for raw in hashes {
                let hash = parse_hash(raw)?;
                let outcome = store.verify(&hash).await?;
                reports.push(serde_json::json!({ "hash": hash, "result": outcome }));
            }
            print_json(&reports)
        }
        Command::List => {
            let store = store(&config)?;
            print_json(&store.list().await?)
        }
    }
}

fn store(config: &HoardConfig) -> anyhow::Result<FsArtifactStore> {
    let client = ReqwestGatewayClient::new().context("failed to build HTTP client")?;
    let store = open_store(
        config,
        Arc::new(client),
        Arc::new(SystemClock),
        Arc::new(TracingEventSink),
    )
    .with_context(|| format!("failed to open cache dir {}", config.cache_dir.display()))?;
    Ok(store)
}

fn parse_hash(raw: String) -> anyhow::Result<ContentHash> {
    Ok(ContentHash::parse(raw)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
