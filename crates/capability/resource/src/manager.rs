use crate::error::ResourceError;
use crate::resource::Resource;
use domain::{ResourceClass, ResourceState, ResourceWorker};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 资源工厂：按 `(uuid, config)` 构造实例。
pub type ResourceFactory =
    Arc<dyn Fn(&str, &Value) -> Result<Arc<dyn Resource>, ResourceError> + Send + Sync>;

struct Entry {
    worker: ResourceWorker,
    instance: Arc<dyn Resource>,
    cancel: CancellationToken,
    start_failed: Arc<AtomicBool>,
}

impl Entry {
    fn state(&self) -> ResourceState {
        if self.start_failed.load(Ordering::Acquire) {
            ResourceState::Down
        } else {
            self.instance.status()
        }
    }
}

/// 工厂注册表 + 在线资源表
pub struct ResourceManager {
    class: ResourceClass,
    factories: RwLock<HashMap<String, ResourceFactory>>,
    entries: RwLock<BTreeMap<String, Entry>>,
    /// 串行化同一管理器上的创建、停止与重载
    lifecycle: tokio::sync::Mutex<()>,
    root: CancellationToken,
}

impl ResourceManager {
    pub fn new(class: ResourceClass) -> Self {
        Self {
            class,
            factories: RwLock::new(HashMap::new()),
            entries: RwLock::new(BTreeMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            root: CancellationToken::new(),
        }
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    pub fn register_factory<F>(&self, type_tag: &str, factory: F)
    where
        F: Fn(&str, &Value) -> Result<Arc<dyn Resource>, ResourceError> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(type_tag.to_string(), Arc::new(factory));
    }

    pub fn has_factory(&self, type_tag: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(type_tag)
    }

    pub fn type_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }

    /// 创建并 `init`；`init` 失败时实例不会留在表中。
    pub async fn create_resource(&self, worker: ResourceWorker) -> Result<Arc<dyn Resource>, ResourceError> {
        let _guard = self.lifecycle.lock().await;
        self.create_locked(worker).await
    }

    async fn create_locked(&self, worker: ResourceWorker) -> Result<Arc<dyn Resource>, ResourceError> {
        if worker.uuid.is_empty() {
            return Err(ResourceError::BadConfig("uuid required".to_string()));
        }
        if !worker.config.is_object() {
            return Err(ResourceError::BadConfig(format!("config of {} must be an object", worker.uuid)));
        }
        if self.contains(&worker.uuid) {
            return Err(ResourceError::Busy(format!("duplicate uuid: {}", worker.uuid)));
        }
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&worker.type_tag)
            .cloned()
            .ok_or_else(|| ResourceError::Unsupported(format!("unknown type: {}", worker.type_tag)))?;

        let instance = factory(&worker.uuid, &worker.config)?;
        instance.init(&worker.uuid, &worker.config).await?;

        let uuid = worker.uuid.clone();
        self.entries.write().unwrap_or_else(|e| e.into_inner()).insert(
            uuid.clone(),
            Entry {
                worker,
                instance: Arc::clone(&instance),
                cancel: self.root.child_token(),
                start_failed: Arc::new(AtomicBool::new(false)),
            },
        );
        info!(target: "edge.resource", class = %self.class, uuid = %uuid, "resource created");
        Ok(instance)
    }

    /// 调用 `start`；失败时资源保留在表中并视为 `DOWN`，由守护进程恢复。
    pub async fn start_resource(&self, uuid: &str) -> Result<(), ResourceError> {
        let _guard = self.lifecycle.lock().await;
        self.start_locked(uuid).await
    }

    async fn start_locked(&self, uuid: &str) -> Result<(), ResourceError> {
        let (instance, cancel, start_failed) = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let entry = entries
                .get(uuid)
                .ok_or_else(|| ResourceError::NotFound(uuid.to_string()))?;
            (
                Arc::clone(&entry.instance),
                entry.cancel.clone(),
                Arc::clone(&entry.start_failed),
            )
        };
        match instance.start(cancel).await {
            Ok(()) => {
                start_failed.store(false, Ordering::Release);
                info!(target: "edge.resource", class = %self.class, uuid = %uuid, "resource started");
                Ok(())
            }
            Err(e) => {
                start_failed.store(true, Ordering::Release);
                warn!(target: "edge.resource", class = %self.class, uuid = %uuid, error = %e, "resource start failed");
                Err(e)
            }
        }
    }

    /// 创建 + 启动。启动失败时返回错误，但资源已登记。
    pub async fn load_resource(&self, worker: ResourceWorker) -> Result<(), ResourceError> {
        let _guard = self.lifecycle.lock().await;
        let uuid = worker.uuid.clone();
        self.create_locked(worker).await?;
        self.start_locked(&uuid).await
    }

    /// 取消、`stop` 并移出表。
    pub async fn stop_resource(&self, uuid: &str) -> Result<ResourceWorker, ResourceError> {
        let _guard = self.lifecycle.lock().await;
        let entry = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uuid)
            .ok_or_else(|| ResourceError::NotFound(uuid.to_string()))?;
        entry.cancel.cancel();
        entry.instance.stop().await;
        info!(target: "edge.resource", class = %self.class, uuid = %uuid, "resource stopped");
        Ok(entry.worker)
    }

    /// 重载：`UP` 时不做任何事；否则停止后以保存的配置重新 `init` + `start`。
    pub async fn reload_resource(&self, uuid: &str) -> Result<(), ResourceError> {
        self.reload(uuid, false).await
    }

    /// 强制重启，不论当前状态（点位表变更后使用）。
    pub async fn restart_resource(&self, uuid: &str) -> Result<(), ResourceError> {
        self.reload(uuid, true).await
    }

    async fn reload(&self, uuid: &str, force: bool) -> Result<(), ResourceError> {
        let _guard = self.lifecycle.lock().await;
        let (worker, instance, old_cancel) = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let entry = entries
                .get(uuid)
                .ok_or_else(|| ResourceError::NotFound(uuid.to_string()))?;
            if !force && entry.state() == ResourceState::Up {
                return Ok(());
            }
            (entry.worker.clone(), Arc::clone(&entry.instance), entry.cancel.clone())
        };

        old_cancel.cancel();
        instance.stop().await;
        let cancel = self.root.child_token();
        if let Some(entry) = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(uuid)
        {
            entry.cancel = cancel;
        }
        if let Err(e) = instance.init(&worker.uuid, &worker.config).await {
            self.mark_start_failed(uuid);
            return Err(e);
        }
        self.start_locked(uuid).await?;
        info!(target: "edge.resource", class = %self.class, uuid = %uuid, "resource reloaded");
        Ok(())
    }

    fn mark_start_failed(&self, uuid: &str) {
        if let Some(entry) = self.entries.read().unwrap_or_else(|e| e.into_inner()).get(uuid) {
            entry.start_failed.store(true, Ordering::Release);
        }
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(uuid)
    }

    pub fn get_resource(&self, uuid: &str) -> Option<Arc<dyn Resource>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(uuid)
            .map(|entry| Arc::clone(&entry.instance))
    }

    pub fn get_worker(&self, uuid: &str) -> Option<ResourceWorker> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(uuid)
            .map(|entry| entry.worker.clone())
    }

    pub fn state(&self, uuid: &str) -> Option<ResourceState> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(uuid)
            .map(Entry::state)
    }

    /// 按 UUID 排序的全部资源及其状态
    pub fn list(&self) -> Vec<(ResourceWorker, ResourceState)> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|entry| (entry.worker.clone(), entry.state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 分页（`current` 从 1 开始），窗口夹到 `[0, len]`；返回 `(total, page)`。
    pub fn paginate(&self, current: usize, size: usize) -> (usize, Vec<(ResourceWorker, ResourceState)>) {
        let all = self.list();
        let total = all.len();
        let start = current.saturating_sub(1).saturating_mul(size).min(total);
        let end = start.saturating_add(size).min(total);
        (total, all[start..end].to_vec())
    }

    /// 停止全部资源（进程退出时）。
    pub async fn shutdown(&self) {
        self.root.cancel();
        let uuids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for uuid in uuids {
            let _ = self.stop_resource(&uuid).await;
        }
    }
}
