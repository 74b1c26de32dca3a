//! ReaperLoop - idle なモデルの回収
//!
//! # フロー
//! 1. reaper_interval ごとに起きる
//! 2. ModelCache::evict_idle(now) で idle_ttl を超えたエントリを捨てる
//! 3. shutdown が来たら抜ける

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::ModelCache;
use crate::domain::CacheKey;
use crate::ports::Clock;

/// ReaperLoop は ModelCache の idle eviction を定期実行する
pub struct ReaperLoop {
    cache: Arc<ModelCache>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(cache: Arc<ModelCache>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            cache,
            clock,
            interval,
        }
    }

    /// 1 回分の回収
    pub fn sweep_once(&self) -> Vec<CacheKey> {
        let evicted = self.cache.evict_idle(self.clock.now());
        if !evicted.is_empty() {
            info!(count = evicted.len(), "reaped idle models");
        }
        evicted
    }

    /// バックグラウンドで回し始める
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        ReaperHandle { shutdown_tx, join }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 最初の tick は即時に返るので読み捨てる
        ticker.tick().await;
        debug!(interval = ?self.interval, "reaper started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // sender が消えたら止める
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once();
                }
            }
        }
        debug!("reaper stopped");
    }
}

/// ReaperHandle
/// - `request_shutdown()` で止める
/// - `shutdown_and_join()` で終了まで待つ
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn request_shutdown(&self) {
        // receiver が先に消えていても構わない
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}
