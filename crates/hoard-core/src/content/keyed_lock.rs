//! KeyedLocks - キーごとの非同期排他
//!
//! 同じ content hash への resolve を直列化し、異なる hash は並行に進めます。
//! 誰も待っていないキーのエントリは guard の drop 時と次の lock() 時に片付けます。
//! 待機中に cancel された future の分もこの掃除で消えます。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

type LockMap<K> = Arc<Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>>;

/// KeyedLocks はキーごとに 1 本の tokio Mutex を持つ
#[derive(Debug)]
pub struct KeyedLocks<K> {
    inner: LockMap<K>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// key のロックを取得するまで待つ
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        let mutex = {
            let mut map = self.inner.lock();
            sweep_idle(&mut map);
            map.entry(key.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key: key.clone(),
            map: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    /// 保持中（または待機者がいる）キーの数
    pub fn len(&self) -> usize {
        self.inner.lock().values().filter(|m| Arc::strong_count(m) > 1).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// KeyGuard が生きている間、同じキーの lock() は待たされる
pub struct KeyGuard<K>
where
    K: Eq + Hash + Clone,
{
    key: K,
    map: LockMap<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.map.lock();
        // map 自身の参照しか残っていなければ待機者はいない
        if let Some(mutex) = map.get(&self.key)
            && Arc::strong_count(mutex) == 1
        {
            map.remove(&self.key);
        }
        sweep_idle(&mut map);
    }
}

/// map 以外から参照されていないエントリを捨てる
fn sweep_idle<K>(map: &mut HashMap<K, Arc<tokio::sync::Mutex<()>>>) {
    map.retain(|_, mutex| Arc::strong_count(mutex) > 1);
}
