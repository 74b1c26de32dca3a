//! Cache - (hash, task) をキーにした load 済みモデルのキャッシュ
//!
//! # 状態遷移
//! `absent → loading → ready → (evict) → absent`
//!
//! # 不変条件
//! - 同じキーへの同時 miss は 1 回の構築を共有し、全員が同じ結果を受け取る
//! - 構築は spawn したタスクで走るので、呼び出し側が cancel されても二重には走らない
//! - 構築に失敗したキーは absent に戻る（待っていた全員が同じエラーを受け取り、次の呼び出しで再試行）
//! - ready エントリ数は `max_entries` を超えない（超えたら LRU で evict）
//! - evict は ready エントリだけが対象。loading 中のものは構築を最後まで続ける

pub mod handle;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::{CacheKey, ContentHash, DomainEvent, EntryState, EvictionReason, HoardError, TaskKind};
use crate::ports::{ArtifactStore, Clock, EventSink, ModelBackend};

pub use self::handle::{LoadedHandle, ModelParts};

/// キャッシュの上限設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// ready エントリの最大数（0 は無制限）
    pub max_entries: usize,
    /// 最後に使われてからこれだけ経ったエントリは reaper が捨てる（None なら捨てない）
    pub idle_ttl: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_entries: 4,
            idle_ttl: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// 1 エントリの外部向けビュー
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub hash: ContentHash,
    pub task: TaskKind,
    pub state: EntryState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// 累積カウンタ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
}

/// status() の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub entries: Vec<EntryView>,
    pub max_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_ttl_secs: Option<u64>,
    pub counters: CacheCounters,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

type LoadResult = Result<Arc<LoadedHandle>, HoardError>;

/// Slot は 1 キー分の構築結果（構築中は None）
struct Slot {
    result: watch::Sender<Option<LoadResult>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            result: watch::Sender::new(None),
        }
    }

    fn ready(&self) -> Option<Arc<LoadedHandle>> {
        match &*self.result.borrow() {
            Some(Ok(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    fn state(&self) -> EntryState {
        if self.ready().is_some() {
            EntryState::Ready
        } else {
            EntryState::Loading
        }
    }

    /// 構築が終わるまで待つ
    async fn wait(&self) -> LoadResult {
        let mut rx = self.result.subscribe();
        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| HoardError::load("model loader stopped"))?
            .clone();
        settled.unwrap_or_else(|| Err(HoardError::load("model loader stopped")))
    }
}

type Entries = Arc<Mutex<HashMap<CacheKey, Arc<Slot>>>>;

/// Loader は spawn した構築タスクが持ち出す部品
#[derive(Clone)]
struct Loader {
    store: Arc<dyn ArtifactStore>,
    backend: Arc<dyn ModelBackend>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    counters: Arc<Counters>,
}

/// ModelCache は起動時に 1 つ作って Runtime に注入する
pub struct ModelCache {
    loader: Loader,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    policy: CachePolicy,
    entries: Entries,
    counters: Arc<Counters>,
}

impl ModelCache {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        backend: Arc<dyn ModelBackend>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        policy: CachePolicy,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        Self {
            loader: Loader {
                store,
                backend,
                clock: Arc::clone(&clock),
                events: Arc::clone(&events),
                counters: Arc::clone(&counters),
            },
            clock,
            events,
            policy,
            entries: Arc::new(Mutex::new(HashMap::new())),
            counters,
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// load 済みなら返し、無ければ resolve → 構築する
    pub async fn get_or_load(&self, hash: &ContentHash, task: TaskKind) -> Result<Arc<LoadedHandle>, HoardError> {
        let key = CacheKey::new(hash.clone(), task);
        let (slot, created) = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::new());
                    entries.insert(key.clone(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if let Some(handle) = slot.ready() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            handle.touch(self.clock.now());
            debug!(%key, "model cache hit");
            return Ok(handle);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        if created {
            self.spawn_load(key.clone(), Arc::clone(&slot));
        }

        let handle = slot.wait().await?;
        handle.touch(self.clock.now());
        self.enforce_capacity(&key);
        Ok(handle)
    }

    /// キーの現在の状態
    pub fn entry_state(&self, key: &CacheKey) -> EntryState {
        self.entries
            .lock()
            .get(key)
            .map(|slot| slot.state())
            .unwrap_or(EntryState::Absent)
    }

    /// ready エントリを明示的に捨てる。捨てたら true
    pub fn evict(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(slot) if slot.ready().is_some() => entries.remove(key).is_some(),
                _ => false,
            }
        };
        if removed {
            self.record_eviction(key, EvictionReason::Explicit);
        }
        removed
    }

    /// 全 ready エントリを捨てる（シャットダウン時）。捨てた数を返す
    pub fn clear(&self) -> usize {
        let evicted = self.remove_ready_where(|_| true);
        for key in &evicted {
            self.record_eviction(key, EvictionReason::Explicit);
        }
        evicted.len()
    }

    /// idle_ttl を超えて使われていない ready エントリを捨てる
    pub fn evict_idle(&self, now: DateTime<Utc>) -> Vec<CacheKey> {
        let Some(ttl) = self.policy.idle_ttl else {
            return Vec::new();
        };
        let evicted =
            self.remove_ready_where(|handle| (now - handle.last_used()).to_std().unwrap_or_default() >= ttl);
        for key in &evicted {
            self.record_eviction(key, EvictionReason::Idle);
        }
        evicted
    }

    pub fn status(&self) -> CacheStatus {
        let mut entries: Vec<EntryView> = self
            .entries
            .lock()
            .iter()
            .map(|(key, slot)| {
                let handle = slot.ready();
                EntryView {
                    hash: key.hash.clone(),
                    task: key.task,
                    state: slot.state(),
                    loaded_at: handle.as_ref().map(|h| h.loaded_at()),
                    last_used: handle.as_ref().map(|h| h.last_used()),
                }
            })
            .collect();
        entries.sort_by(|a, b| (&a.hash, a.task).cmp(&(&b.hash, b.task)));

        CacheStatus {
            entries,
            max_entries: self.policy.max_entries,
            idle_ttl_secs: self.policy.idle_ttl.map(|d| d.as_secs()),
            counters: self.counters.snapshot(),
        }
    }

    /// ready エントリ数
    pub fn len(&self) -> usize {
        self.entries.lock().values().filter(|s| s.ready().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 構築は呼び出し側の future から切り離して走らせる
    fn spawn_load(&self, key: CacheKey, slot: Arc<Slot>) {
        let loader = self.loader.clone();
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let result = loader.construct(&key).await;
            if result.is_err() {
                // 待機者に知らせる前に外しておけば、後続の呼び出しは新しい slot で再試行する
                let mut entries = entries.lock();
                if entries.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                    entries.remove(&key);
                }
            }
            slot.result.send_replace(Some(result));
        });
    }

    /// ready エントリが上限を超えていたら、keep 以外で最も古く使われたものから捨てる
    fn enforce_capacity(&self, keep: &CacheKey) {
        let max = self.policy.max_entries;
        if max == 0 {
            return;
        }

        let mut evicted = Vec::new();
        {
            let mut entries = self.entries.lock();
            loop {
                let mut ready = 0usize;
                let mut victim: Option<(CacheKey, DateTime<Utc>)> = None;
                for (key, slot) in entries.iter() {
                    let Some(handle) = slot.ready() else {
                        continue;
                    };
                    ready += 1;
                    let last_used = handle.last_used();
                    if key != keep && victim.as_ref().is_none_or(|(_, oldest)| last_used < *oldest) {
                        victim = Some((key.clone(), last_used));
                    }
                }
                if ready <= max {
                    break;
                }
                let Some((key, _)) = victim else {
                    break;
                };
                entries.remove(&key);
                evicted.push(key);
            }
        }

        for key in &evicted {
            self.record_eviction(key, EvictionReason::Capacity);
        }
    }

    fn remove_ready_where(&self, mut pred: impl FnMut(&LoadedHandle) -> bool) -> Vec<CacheKey> {
        let mut entries = self.entries.lock();
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, slot)| slot.ready().is_some_and(|h| pred(&h)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        keys
    }

    fn record_eviction(&self, key: &CacheKey, reason: EvictionReason) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        info!(%key, ?reason, "model evicted");
        self.events.emit(DomainEvent::ModelEvicted {
            key: key.clone(),
            reason,
        });
    }
}

impl Loader {
    async fn construct(&self, key: &CacheKey) -> LoadResult {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        info!(%key, "loading model");

        match self.build(key).await {
            Ok(handle) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(%key, elapsed_ms, dir = %handle.dir().display(), "model loaded");
                self.events.emit(DomainEvent::ModelLoaded {
                    key: key.clone(),
                    elapsed_ms,
                });
                Ok(Arc::new(handle))
            }
            Err(err) => {
                self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %err, "model load failed");
                self.events.emit(DomainEvent::ModelLoadFailed {
                    key: key.clone(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn build(&self, key: &CacheKey) -> Result<LoadedHandle, HoardError> {
        let dir = self.store.resolve(&key.hash).await?;

        let backend = Arc::clone(&self.backend);
        let task = key.task;
        let build_dir = dir.clone();
        let parts = tokio::task::spawn_blocking(move || ModelParts::build(task, backend.as_ref(), &build_dir))
            .await
            .map_err(|e| HoardError::load(format!("loader task failed: {e}")))??;

        Ok(LoadedHandle::new(key.clone(), dir, parts, self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StatusClass;
    use crate::impls::MemoryEventSink;
    use crate::ports::FixedClock;
    use crate::testing::{FakeBackend, StubStore, fixed_time};

    struct Fixture {
        store: Arc<StubStore>,
        backend: Arc<FakeBackend>,
        clock: Arc<FixedClock>,
        events: Arc<MemoryEventSink>,
        cache: Arc<ModelCache>,
    }

    fn fixture(policy: CachePolicy) -> Fixture {
        let store = Arc::new(StubStore::new());
        let backend = Arc::new(FakeBackend::new());
        let clock = Arc::new(FixedClock::new(fixed_time()));
        let events = Arc::new(MemoryEventSink::new());
        let cache = Arc::new(ModelCache::new(
            store.clone(),
            backend.clone(),
            clock.clone(),
            events.clone(),
            policy,
        ));
        Fixture {
            store,
            backend,
            clock,
            events,
            cache,
        }
    }

    fn hash(s: &str) -> ContentHash {
        ContentHash::parse(s).unwrap()
    }

    fn unbounded() -> CachePolicy {
        CachePolicy {
            max_entries: 0,
            idle_ttl: None,
        }
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit_with_the_same_handle() {
        let fx = fixture(unbounded());

        let first = fx.cache.get_or_load(&hash("QmA"), TaskKind::TextGeneration).await.unwrap();
        let second = fx.cache.get_or_load(&hash("QmA"), TaskKind::TextGeneration).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.backend.load_count(), 1);
        assert_eq!(fx.store.resolve_count(), 1);

        let counters = fx.cache.status().counters;
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.loads, 1);
    }

    #[tokio::test]
    async fn same_hash_with_different_tasks_are_separate_entries() {
        let fx = fixture(unbounded());

        let generation = fx.cache.get_or_load(&hash("QmA"), TaskKind::TextGeneration).await.unwrap();
        let classification = fx
            .cache
            .get_or_load(&hash("QmA"), TaskKind::TextClassification)
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&generation, &classification));
        assert_eq!(generation.task(), TaskKind::TextGeneration);
        assert_eq!(classification.task(), TaskKind::TextClassification);
        assert_eq!(fx.cache.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_construction() {
        let fx = fixture(unbounded());
        fx.backend.set_load_delay(Duration::from_millis(50));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&fx.cache);
            handles.push(tokio::spawn(async move {
                cache.get_or_load(&hash("QmA"), TaskKind::ImageClassification).await
            }));
        }
        let mut loaded = Vec::new();
        for handle in handles {
            loaded.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(fx.backend.load_count(), 1);
        assert!(loaded.iter().all(|h| Arc::ptr_eq(h, &loaded[0])));
        assert_eq!(fx.events.count("model_loaded"), 1);
    }

    #[tokio::test]
    async fn failed_loads_leave_the_key_absent_and_are_retried() {
        let fx = fixture(unbounded());
        fx.backend.fail_loads(true);

        let err = fx
            .cache
            .get_or_load(&hash("QmA"), TaskKind::TextGeneration)
            .await
            .unwrap_err();
        assert!(matches!(err, HoardError::Load(_)));

        let key = CacheKey::new(hash("QmA"), TaskKind::TextGeneration);
        assert_eq!(fx.cache.entry_state(&key), EntryState::Absent);
        assert_eq!(fx.events.count("model_load_failed"), 1);

        fx.backend.fail_loads(false);
        fx.cache.get_or_load(&hash("QmA"), TaskKind::TextGeneration).await.unwrap();
        assert_eq!(fx.cache.entry_state(&key), EntryState::Ready);
        assert_eq!(fx.cache.status().counters.load_failures, 1);
    }

    #[tokio::test]
    async fn waiters_share_a_failed_load_and_retry_once() {
        let fx = fixture(unbounded());
        fx.backend.set_load_delay(Duration::from_millis(50));
        fx.backend.fail_next_load();
        let key = CacheKey::new(hash("QmA"), TaskKind::TextGeneration);

        let (a, b) = tokio::join!(
            fx.cache.get_or_load(&key.hash, key.task),
            fx.cache.get_or_load(&key.hash, key.task),
        );
        assert!(matches!(a, Err(HoardError::Load(_))));
        assert!(matches!(b, Err(HoardError::Load(_))));
        assert_eq!(fx.events.count("model_load_failed"), 1);
        assert_eq!(fx.cache.entry_state(&key), EntryState::Absent);

        let (c, d) = tokio::join!(
            fx.cache.get_or_load(&key.hash, key.task),
            fx.cache.get_or_load(&key.hash, key.task),
        );
        let (c, d) = (c.unwrap(), d.unwrap());

        assert!(Arc::ptr_eq(&c, &d));
        assert_eq!(fx.backend.max_concurrent_loads(), 1);
        assert_eq!(fx.backend.load_count(), 1);
        assert_eq!(fx.store.resolve_count(), 2);
        assert_eq!(fx.cache.entry_state(&key), EntryState::Ready);
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_abandon_the_load() {
        let fx = fixture(unbounded());
        fx.backend.set_load_delay(Duration::from_millis(50));
        let key = CacheKey::new(hash("QmA"), TaskKind::SpeechRecognition);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(5), fx.cache.get_or_load(&key.hash, key.task)).await;
        assert!(cancelled.is_err());
        assert_eq!(fx.cache.entry_state(&key), EntryState::Loading);

        fx.cache.get_or_load(&key.hash, key.task).await.unwrap();

        assert_eq!(fx.backend.max_concurrent_loads(), 1);
        assert_eq!(fx.backend.load_count(), 1);
        assert_eq!(fx.cache.status().counters.loads, 1);
    }

    #[tokio::test]
    async fn store_errors_keep_their_classification() {
        let fx = fixture(unbounded());
        fx.store.mark_missing("QmGone");

        let err = fx
            .cache
            .get_or_load(&hash("QmGone"), TaskKind::SpeechRecognition)
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusClass::NotFound);
        assert_eq!(fx.backend.load_count(), 0);
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted_over_capacity() {
        let fx = fixture(CachePolicy {
            max_entries: 2,
            idle_ttl: None,
        });
        let step = chrono::Duration::seconds(1);

        fx.cache.get_or_load(&hash("QmA"), TaskKind::TextGeneration).await.unwrap();
        fx.clock.advance(step);
        fx.cache.get_or_load(&hash("QmB"), TaskKind::TextGeneration).await.unwrap();
        fx.clock.advance(step);
        fx.cache.get_or_load(&hash("QmA"), TaskKind::TextGeneration).await.unwrap();
        fx.clock.advance(step);
        fx.cache.get_or_load(&hash("QmC"), TaskKind::TextGeneration).await.unwrap();

        let state = |h: &str| fx.cache.entry_state(&CacheKey::new(hash(h), TaskKind::TextGeneration));
        assert_eq!(state("QmA"), EntryState::Ready);
        assert_eq!(state("QmB"), EntryState::Absent);
        assert_eq!(state("QmC"), EntryState::Ready);
        assert_eq!(fx.cache.len(), 2);
        assert_eq!(
            fx.events.events().last(),
            Some(&DomainEvent::ModelEvicted {
                key: CacheKey::new(hash("QmB"), TaskKind::TextGeneration),
                reason: EvictionReason::Capacity,
            })
        );
    }

    #[tokio::test]
    async fn idle_entries_are_evicted_after_ttl() {
        let fx = fixture(CachePolicy {
            max_entries: 0,
            idle_ttl: Some(Duration::from_secs(60)),
        });

        fx.cache.get_or_load(&hash("QmOld"), TaskKind::TextGeneration).await.unwrap();
        fx.clock.advance(chrono::Duration::seconds(45));
        fx.cache.get_or_load(&hash("QmNew"), TaskKind::TextGeneration).await.unwrap();
        fx.clock.advance(chrono::Duration::seconds(30));

        let evicted = fx.cache.evict_idle(fx.clock.now());

        assert_eq!(evicted, vec![CacheKey::new(hash("QmOld"), TaskKind::TextGeneration)]);
        assert_eq!(fx.cache.len(), 1);
    }

    #[tokio::test]
    async fn idle_eviction_is_disabled_without_ttl() {
        let fx = fixture(unbounded());
        fx.cache.get_or_load(&hash("QmA"), TaskKind::TextGeneration).await.unwrap();
        fx.clock.advance(chrono::Duration::days(365));

        assert!(fx.cache.evict_idle(fx.clock.now()).is_empty());
    }

    #[tokio::test]
    async fn evicted_handles_stay_usable_and_reload_on_next_call() {
        let fx = fixture(unbounded());
        let key = CacheKey::new(hash("QmA"), TaskKind::TextClassification);

        let held = fx.cache.get_or_load(&key.hash, key.task).await.unwrap();
        assert!(fx.cache.evict(&key));
        assert!(!fx.cache.evict(&key));
        assert_eq!(held.task(), TaskKind::TextClassification);

        let reloaded = fx.cache.get_or_load(&key.hash, key.task).await.unwrap();
        assert!(!Arc::ptr_eq(&held, &reloaded));
        assert_eq!(fx.backend.load_count(), 2);
    }

    #[tokio::test]
    async fn clear_drops_every_ready_entry() {
        let fx = fixture(unbounded());
        for task in TaskKind::ALL {
            fx.cache.get_or_load(&hash("QmA"), task).await.unwrap();
        }

        assert_eq!(fx.cache.clear(), 4);
        assert!(fx.cache.is_empty());
        assert_eq!(fx.cache.status().counters.evictions, 4);
    }

    #[tokio::test]
    async fn status_lists_entries_in_key_order() {
        let fx = fixture(unbounded());
        fx.cache.get_or_load(&hash("QmB"), TaskKind::TextGeneration).await.unwrap();
        fx.cache.get_or_load(&hash("QmA"), TaskKind::SpeechRecognition).await.unwrap();

        let status = fx.cache.status();

        let keys: Vec<_> = status.entries.iter().map(|e| (e.hash.as_str(), e.task)).collect();
        assert_eq!(
            keys,
            vec![("QmA", TaskKind::SpeechRecognition), ("QmB", TaskKind::TextGeneration)]
        );
        assert!(status.entries.iter().all(|e| e.state == EntryState::Ready));
        assert_eq!(status.entries[0].loaded_at, Some(fixed_time()));
    }
}
