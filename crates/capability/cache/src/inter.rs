use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Namespaces<V> = HashMap<String, HashMap<String, Entry<V>>>;

/// 带 TTL 的命名空间 KV 缓存
pub struct InterCache<V> {
    inner: RwLock<Namespaces<V>>,
}

impl<V> Default for InterCache<V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> InterCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Namespaces<V>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Namespaces<V>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 写入；`ttl_secs == 0` 表示永不过期。
    pub fn set(&self, namespace: &str, key: &str, value: V, ttl_secs: u64) {
        self.set_with_duration(namespace, key, value, Duration::from_secs(ttl_secs));
    }

    /// 写入；`Duration::ZERO` 表示永不过期。
    pub fn set_with_duration(&self, namespace: &str, key: &str, value: V, ttl: Duration) {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    /// 存在且未过期时返回副本；读到过期条目会顺带删除。
    pub fn get(&self, namespace: &str, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let guard = self.read();
            let entry = guard.get(namespace)?.get(key)?;
            if !entry.expired(now) {
                return Some(entry.value.clone());
            }
        }
        let mut guard = self.write();
        if let Some(entries) = guard.get_mut(namespace) {
            if entries.get(key).is_some_and(|entry| entry.expired(now)) {
                entries.remove(key);
            }
        }
        None
    }

    /// 幂等删除，返回是否删掉了条目。
    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let mut guard = self.write();
        let Some(entries) = guard.get_mut(namespace) else {
            return false;
        };
        let removed = entries.remove(key).is_some();
        if entries.is_empty() {
            guard.remove(namespace);
        }
        removed
    }

    pub fn clear_namespace(&self, namespace: &str) {
        self.write().remove(namespace);
    }

    /// 未过期的 key，按字典序
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let now = Instant::now();
        let guard = self.read();
        let mut keys: Vec<String> = guard
            .get(namespace)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| !entry.expired(now))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn size(&self, namespace: &str) -> usize {
        let now = Instant::now();
        self.read()
            .get(namespace)
            .map(|entries| entries.values().filter(|entry| !entry.expired(now)).count())
            .unwrap_or(0)
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 删除所有过期条目，返回删除数量。
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.write();
        let mut removed = 0;
        for entries in guard.values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| !entry.expired(now));
            removed += before - entries.len();
        }
        guard.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// 启动后台清理任务，`cancel` 触发后退出。
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(target: "edge.cache", removed, "purged expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_is_idempotent() {
        let cache = InterCache::new();
        cache.set("ns", "k", 1u32, 0);
        assert!(cache.delete("ns", "k"));
        assert!(!cache.delete("ns", "k"));
        assert_eq!(cache.get("ns", "k"), None);
        assert!(cache.namespaces().is_empty());
    }

    #[test]
    fn expired_entries_are_hidden_and_purged() {
        let cache = InterCache::new();
        cache.set_with_duration("ns", "short", 1u32, Duration::from_millis(1));
        cache.set("ns", "long", 2u32, 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.keys("ns"), vec!["long".to_string()]);
        assert_eq!(cache.size("ns"), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("ns", "long"), Some(2));
    }
}
