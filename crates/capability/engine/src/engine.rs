use crate::error::EngineError;
use crate::index::RuleIndex;
use crate::router::TargetRouter;
use domain::{
    DataPoint, INGRESS_TOPIC, InboundRecord, Origin, ResourceClass, ResourceState, ResourceWorker,
    Rule, TEST_RULE_MARKER,
};
use edge_cache::{InterCache, clear_fault};
use edge_driver::{DriverContext, INTERNAL_EVENT};
use edge_resource::{ResourceError, ResourceManager};
use edge_script::{ScriptError, ScriptInput, ScriptLibrary, ScriptRuntime};
use edge_storage::validate_point;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// 规则引擎：持有四类资源管理器、规则表与脚本运行时。
///
/// 入口队列 `rule.engine.ingress` 只有一个消费者，同一来源的记录按到达顺序分发。
pub struct RuleEngine {
    ctx: DriverContext,
    sources: Arc<ResourceManager>,
    targets: Arc<ResourceManager>,
    devices: Arc<ResourceManager>,
    plugins: Arc<ResourceManager>,
    scripts: Arc<ScriptRuntime>,
    rules: RwLock<RuleIndex>,
    /// 串行化资源的创建、更新与删除（单例检查依赖它）
    admin: tokio::sync::Mutex<()>,
    started: AtomicBool,
}

impl RuleEngine {
    /// 创建引擎并注册全部内置驱动；`store` 为脚本 `store.*` 使用的缓存。
    pub fn new(ctx: DriverContext, store: Arc<InterCache<String>>) -> Arc<Self> {
        let sources = Arc::new(ResourceManager::new(ResourceClass::Source));
        let targets = Arc::new(ResourceManager::new(ResourceClass::Target));
        let devices = Arc::new(ResourceManager::new(ResourceClass::Device));
        let plugins = Arc::new(ResourceManager::new(ResourceClass::Plugin));
        edge_driver::register_all(&ctx, &sources, &targets, &devices, &plugins);

        let sink = Arc::new(TargetRouter::new(Arc::clone(&targets)));
        let scripts = Arc::new(ScriptRuntime::new(ScriptLibrary::new(store, sink)));
        Arc::new(Self {
            ctx,
            sources,
            targets,
            devices,
            plugins,
            scripts,
            rules: RwLock::new(RuleIndex::default()),
            admin: tokio::sync::Mutex::new(()),
            started: AtomicBool::new(false),
        })
    }

    /// 订阅入口队列，开始分发。重复调用无效果。
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let engine = Arc::downgrade(self);
        self.ctx.ingress.subscribe(INGRESS_TOPIC, move |record: InboundRecord| {
            let engine = engine.clone();
            async move {
                if let Some(engine) = engine.upgrade() {
                    engine.dispatch(record).await;
                }
            }
        });
        info!(target: "edge.engine", topic = INGRESS_TOPIC, "rule engine started");
    }

    pub fn context(&self) -> &DriverContext {
        &self.ctx
    }

    pub fn sources(&self) -> &Arc<ResourceManager> {
        &self.sources
    }

    pub fn targets(&self) -> &Arc<ResourceManager> {
        &self.targets
    }

    pub fn devices(&self) -> &Arc<ResourceManager> {
        &self.devices
    }

    pub fn plugins(&self) -> &Arc<ResourceManager> {
        &self.plugins
    }

    /// 原生资源与插件共用一个管理器。
    pub fn manager(&self, class: ResourceClass) -> &Arc<ResourceManager> {
        match class {
            ResourceClass::Source => &self.sources,
            ResourceClass::Target => &self.targets,
            ResourceClass::Device => &self.devices,
            ResourceClass::Plugin | ResourceClass::Native => &self.plugins,
        }
    }

    // ---------------------------------------------------------------
    // 分发
    // ---------------------------------------------------------------

    /// 把一条入站记录交给绑定到其来源的每条规则。
    ///
    /// 带测试标记的记录以 dry-run 执行：脚本内 `data:ToX` 不投递，返回值不转发，钩子不调用。
    pub async fn dispatch(&self, record: InboundRecord) {
        let (payload, dry_run) = match record.payload.strip_prefix(TEST_RULE_MARKER) {
            Some(rest) => (rest.to_string(), true),
            None => (record.payload.clone(), false),
        };
        let rules = self
            .rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .bound(&record.origin);
        if rules.is_empty() {
            debug!(target: "edge.engine", origin = %record.origin.uuid(), "no rule bound, record ignored");
            return;
        }
        for rule in rules {
            edge_telemetry::record_rule_execution();
            match self.run_rule(&rule.uuid, payload.clone(), dry_run).await {
                Ok(output) if dry_run => {
                    info!(
                        target: "edge.engine",
                        rule = %rule.uuid,
                        output = ?output,
                        "test record dispatched"
                    );
                }
                Ok(Some(output)) if !output.is_empty() => self.forward(&rule, output),
                Ok(_) => {}
                Err(e) => {
                    edge_telemetry::record_rule_failure();
                    warn!(target: "edge.engine", rule = %rule.uuid, error = %e, "rule execution failed");
                }
            }
        }
    }

    async fn run_rule(&self, id: &str, payload: String, dry_run: bool) -> Result<Option<String>, ScriptError> {
        let scripts = Arc::clone(&self.scripts);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let input = ScriptInput::from(payload);
            if dry_run {
                return scripts.execute_dry_run(&id, &input);
            }
            let result = scripts.execute(&id, &input);
            let hook = match &result {
                Ok(_) => scripts.on_success(&id),
                Err(ScriptError::Busy(_)) => Ok(()),
                Err(e) => scripts.on_failed(&id, &e.to_string()),
            };
            if let Err(e) = hook {
                warn!(target: "edge.engine", rule = %id, error = %e, "rule hook failed");
            }
            result
        })
        .await
        .map_err(|e| ScriptError::Runtime(e.to_string()))?
    }

    fn forward(&self, rule: &Rule, output: String) {
        for target in &rule.targets {
            let result = match self.targets.get_resource(target) {
                Some(instance) => instance.to(output.clone()).map_err(|e| e.to_string()),
                None => Err(format!("target not found: {}", target)),
            };
            if let Err(e) = result {
                warn!(
                    target: "edge.engine",
                    rule = %rule.uuid,
                    target_uuid = %target,
                    error = %e,
                    "rule output not forwarded"
                );
            }
        }
    }

    // ---------------------------------------------------------------
    // 规则
    // ---------------------------------------------------------------

    /// 校验脚本与绑定后加载；同 UUID 的规则被替换。
    pub fn load_rule(&self, rule: Rule) -> Result<(), EngineError> {
        if rule.uuid.is_empty() {
            return Err(EngineError::BadConfig("rule uuid required".to_string()));
        }
        if rule.source.is_none() && rule.device.is_none() {
            return Err(EngineError::BadConfig(format!(
                "rule {} must bind a source or a device",
                rule.uuid
            )));
        }
        if let Some(source) = &rule.source
            && !self.sources.contains(source)
        {
            return Err(EngineError::NotFound(format!("source {}", source)));
        }
        if let Some(device) = &rule.device
            && !self.devices.contains(device)
        {
            return Err(EngineError::NotFound(format!("device {}", device)));
        }

        let source = rule.script_source();
        self.scripts.verify(&source)?;
        self.scripts.load_script(&rule.uuid, &source)?;
        let uuid = rule.uuid.clone();
        let replaced = self
            .rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rule)
            .is_some();
        info!(target: "edge.engine", rule = %uuid, replaced, "rule loaded");
        Ok(())
    }

    pub fn remove_rule(&self, uuid: &str) -> Result<Rule, EngineError> {
        let rule = self
            .rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(format!("rule {}", uuid)))?;
        self.scripts.remove_script(uuid);
        info!(target: "edge.engine", rule = %uuid, "rule removed");
        Ok(rule)
    }

    pub fn get_rule(&self, uuid: &str) -> Result<Rule, EngineError> {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(uuid)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("rule {}", uuid)))
    }

    pub fn all_rules(&self) -> Vec<Rule> {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).all()
    }

    // ---------------------------------------------------------------
    // 资源
    // ---------------------------------------------------------------

    /// 创建时拒绝未注册的源类型。
    pub fn check_source_type(&self, type_tag: &str) -> Result<(), EngineError> {
        if self.sources.has_factory(type_tag) {
            Ok(())
        } else {
            Err(ResourceError::Unsupported(format!("unknown source type: {}", type_tag)).into())
        }
    }

    fn check_singleton(&self, worker: &ResourceWorker) -> Result<(), EngineError> {
        if worker.type_tag != INTERNAL_EVENT {
            return Ok(());
        }
        let taken = self
            .sources
            .list()
            .into_iter()
            .any(|(other, _)| other.type_tag == INTERNAL_EVENT && other.uuid != worker.uuid);
        if taken {
            return Err(EngineError::Busy(format!("{} source already exists", INTERNAL_EVENT)));
        }
        Ok(())
    }

    /// 注册并启动。启动失败时资源保留为 `DOWN`，由守护进程恢复，错误仍返回给调用方。
    pub async fn load_resource(&self, class: ResourceClass, worker: ResourceWorker) -> Result<(), EngineError> {
        let _guard = self.admin.lock().await;
        self.load_locked(class, worker).await
    }

    async fn load_locked(&self, class: ResourceClass, worker: ResourceWorker) -> Result<(), EngineError> {
        if class == ResourceClass::Source {
            self.check_source_type(&worker.type_tag)?;
            self.check_singleton(&worker)?;
        }
        self.manager(class).load_resource(worker).await?;
        Ok(())
    }

    pub fn get_resource(&self, class: ResourceClass, uuid: &str) -> Result<(ResourceWorker, ResourceState), EngineError> {
        let manager = self.manager(class);
        let worker = manager
            .get_worker(uuid)
            .ok_or_else(|| ResourceError::NotFound(uuid.to_string()))?;
        let state = manager.state(uuid).unwrap_or(ResourceState::Stop);
        Ok((worker, state))
    }

    pub fn all_resources(&self, class: ResourceClass) -> Vec<(ResourceWorker, ResourceState)> {
        self.manager(class).list()
    }

    /// 重载：`UP` 时不做任何事。
    pub async fn restart_resource(&self, class: ResourceClass, uuid: &str) -> Result<(), EngineError> {
        self.manager(class).reload_resource(uuid).await?;
        Ok(())
    }

    /// 停止旧实例后以新配置重新创建并启动；新配置无法创建时恢复旧配置。
    pub async fn update_resource(&self, class: ResourceClass, worker: ResourceWorker) -> Result<(), EngineError> {
        let _guard = self.admin.lock().await;
        let manager = self.manager(class);
        if !manager.contains(&worker.uuid) {
            return Err(ResourceError::NotFound(worker.uuid.clone()).into());
        }
        if class == ResourceClass::Source {
            self.check_source_type(&worker.type_tag)?;
            self.check_singleton(&worker)?;
        }
        let uuid = worker.uuid.clone();
        let previous = manager.stop_resource(&uuid).await?;
        match manager.load_resource(worker).await {
            Ok(()) => {
                info!(target: "edge.engine", class = %class, uuid = %uuid, "resource updated");
                Ok(())
            }
            Err(e) if !manager.contains(&uuid) => {
                warn!(target: "edge.engine", class = %class, uuid = %uuid, error = %e, "update rejected, restoring previous config");
                if let Err(restore) = manager.load_resource(previous).await {
                    warn!(target: "edge.engine", class = %class, uuid = %uuid, error = %restore, "previous config restored in DOWN state");
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 停止并移除资源；绑定到该源或设备的规则一并移除。
    /// 设备还会清除其缓存 namespace 与点位表。
    pub async fn delete_resource(&self, class: ResourceClass, uuid: &str) -> Result<ResourceWorker, EngineError> {
        let _guard = self.admin.lock().await;
        let worker = self.manager(class).stop_resource(uuid).await?;

        if matches!(class, ResourceClass::Source | ResourceClass::Device) {
            let bound = self
                .rules
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .bound_uuids(uuid);
            for rule in bound {
                if self.remove_rule(&rule).is_ok() {
                    info!(target: "edge.engine", rule = %rule, resource = %uuid, "bound rule removed with resource");
                }
            }
        }
        if class == ResourceClass::Device {
            self.ctx.cache.clear_namespace(uuid);
            let removed = self.ctx.points.delete_device(uuid).await?;
            debug!(target: "edge.engine", device = %uuid, points = removed, "device points purged");
        }
        clear_fault(&self.ctx.cache, uuid);
        info!(target: "edge.engine", class = %class, uuid = %uuid, "resource deleted");
        Ok(worker)
    }

    pub async fn load_in_end(&self, worker: ResourceWorker) -> Result<(), EngineError> {
        self.load_resource(ResourceClass::Source, worker).await
    }

    pub async fn load_out_end(&self, worker: ResourceWorker) -> Result<(), EngineError> {
        self.load_resource(ResourceClass::Target, worker).await
    }

    pub async fn load_device(&self, worker: ResourceWorker) -> Result<(), EngineError> {
        self.load_resource(ResourceClass::Device, worker).await
    }

    pub async fn load_plugin(&self, worker: ResourceWorker) -> Result<(), EngineError> {
        self.load_resource(ResourceClass::Plugin, worker).await
    }

    pub fn get_in_end(&self, uuid: &str) -> Result<(ResourceWorker, ResourceState), EngineError> {
        self.get_resource(ResourceClass::Source, uuid)
    }

    pub fn get_out_end(&self, uuid: &str) -> Result<(ResourceWorker, ResourceState), EngineError> {
        self.get_resource(ResourceClass::Target, uuid)
    }

    pub fn get_device(&self, uuid: &str) -> Result<(ResourceWorker, ResourceState), EngineError> {
        self.get_resource(ResourceClass::Device, uuid)
    }

    pub fn all_in_ends(&self) -> Vec<(ResourceWorker, ResourceState)> {
        self.all_resources(ResourceClass::Source)
    }

    pub fn all_out_ends(&self) -> Vec<(ResourceWorker, ResourceState)> {
        self.all_resources(ResourceClass::Target)
    }

    pub fn all_devices(&self) -> Vec<(ResourceWorker, ResourceState)> {
        self.all_resources(ResourceClass::Device)
    }

    pub async fn restart_in_end(&self, uuid: &str) -> Result<(), EngineError> {
        self.restart_resource(ResourceClass::Source, uuid).await
    }

    pub async fn restart_out_end(&self, uuid: &str) -> Result<(), EngineError> {
        self.restart_resource(ResourceClass::Target, uuid).await
    }

    pub async fn restart_device(&self, uuid: &str) -> Result<(), EngineError> {
        self.restart_resource(ResourceClass::Device, uuid).await
    }

    /// 转发控制命令到资源的 `on_ctrl`。
    pub async fn ctrl(&self, class: ResourceClass, uuid: &str, cmd: &str, args: &Value) -> Result<Value, EngineError> {
        let instance = self
            .manager(class)
            .get_resource(uuid)
            .ok_or_else(|| ResourceError::NotFound(uuid.to_string()))?;
        Ok(instance.on_ctrl(cmd, args).await?)
    }

    /// 监听类源当前连接的客户端。
    pub async fn list_clients(&self, uuid: &str) -> Result<Value, EngineError> {
        self.ctrl(ResourceClass::Source, uuid, "listClients", &Value::Null).await
    }

    /// 以测试标记注入一条记录，走与真实数据相同的分发路径。
    pub fn test_inject(&self, uuid: &str, data: &str) -> Result<(), EngineError> {
        let origin = if self.sources.contains(uuid) {
            Origin::Source(uuid.to_string())
        } else if self.devices.contains(uuid) {
            Origin::Device(uuid.to_string())
        } else {
            return Err(EngineError::NotFound(format!("source or device {}", uuid)));
        };
        let record = InboundRecord::new(origin, format!("{}{}", TEST_RULE_MARKER, data));
        self.ctx.ingress.publish(INGRESS_TOPIC, record)?;
        edge_telemetry::record_ingress_published();
        debug!(target: "edge.engine", uuid = %uuid, "test record injected");
        Ok(())
    }

    // ---------------------------------------------------------------
    // 点位表
    // ---------------------------------------------------------------

    pub async fn points(&self, device: &str) -> Result<Vec<DataPoint>, EngineError> {
        if !self.devices.contains(device) {
            return Err(EngineError::NotFound(format!("device {}", device)));
        }
        Ok(self.ctx.points.list_points(device).await?)
    }

    /// 校验后写入点位表，再强制重启设备以加载新点位。
    pub async fn upsert_point(&self, point: DataPoint) -> Result<DataPoint, EngineError> {
        let device = point.device_uuid.clone();
        if !self.devices.contains(&device) {
            return Err(EngineError::NotFound(format!("device {}", device)));
        }
        let existing = self.ctx.points.list_points(&device).await?;
        let point = validate_point(point, &existing)?;
        let saved = self.ctx.points.upsert_point(point).await?;
        self.reload_points(&device).await;
        Ok(saved)
    }

    pub async fn delete_points(&self, device: &str, point_uuids: &[String]) -> Result<usize, EngineError> {
        if !self.devices.contains(device) {
            return Err(EngineError::NotFound(format!("device {}", device)));
        }
        let removed = self.ctx.points.delete_points(device, point_uuids).await?;
        for point in point_uuids {
            self.ctx.cache.delete(device, point);
        }
        self.reload_points(device).await;
        Ok(removed)
    }

    async fn reload_points(&self, device: &str) {
        if let Err(e) = self.devices.restart_resource(device).await {
            warn!(target: "edge.engine", device = %device, error = %e, "device restart after point change failed");
        }
    }

    /// 停止全部资源；入口队列由调用方销毁。
    pub async fn shutdown(&self) {
        self.sources.shutdown().await;
        self.devices.shutdown().await;
        self.plugins.shutdown().await;
        self.targets.shutdown().await;
        info!(target: "edge.engine", rules = self.all_rules().len(), "rule engine stopped");
    }
}
