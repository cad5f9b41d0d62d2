//! 系统监控插件：周期采样系统负载，发布到 `system.cpu.load.<subsystem>`

use crate::context::{DriverContext, parse_config};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::{EventRecord, ResourceState, cpu_load_topic};
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorConfig {
    #[serde(default = "default_subsystem")]
    subsystem: String,
    #[serde(default = "default_interval")]
    interval_ms: u64,
    #[serde(default = "default_loadavg_path")]
    loadavg_path: String,
}

fn default_subsystem() -> String {
    "gateway".to_string()
}

fn default_interval() -> u64 {
    5000
}

fn default_loadavg_path() -> String {
    "/proc/loadavg".to_string()
}

/// 1/5/15 分钟平均负载
pub(crate) fn parse_loadavg(text: &str) -> Option<[f64; 3]> {
    let mut parts = text.split_whitespace().map(|p| p.parse::<f64>().ok());
    Some([parts.next()??, parts.next()??, parts.next()??])
}

async fn sample(path: &str) -> Result<Value, ResourceError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ResourceError::Transport(format!("{}: {}", path, e)))?;
    let [load1, load5, load15] = parse_loadavg(&text)
        .ok_or_else(|| ResourceError::Decode(format!("unexpected loadavg: {}", text.trim())))?;
    Ok(json!({ "load1": load1, "load5": load5, "load15": load15 }))
}

pub struct SystemMonitor {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<MonitorConfig>>,
    last: Arc<RwLock<Value>>,
    state: StateCell,
    tasks: TaskSlot,
}

impl SystemMonitor {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            last: Arc::new(RwLock::new(Value::Null)),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }
}

#[async_trait]
impl Resource for SystemMonitor {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: MonitorConfig = parse_config(config)?;
        if parsed.subsystem.is_empty() || parsed.subsystem.contains(['.', '#', '*']) {
            return Err(ResourceError::BadConfig(format!("invalid subsystem: {}", parsed.subsystem)));
        }
        *self.uuid.write().unwrap_or_else(|e| e.into_inner()) = uuid.to_string();
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Some(parsed);
        Ok(())
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), ResourceError> {
        let config = self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ResourceError::BadConfig("plugin is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();

        // 启动前先采一次，数据源不可用时直接失败
        if let Err(err) = sample(&config.loadavg_path).await {
            self.state.set(ResourceState::Down);
            self.ctx.fault(&uuid, &err);
            return Err(err);
        }

        let token = self.tasks.begin(&cancel);
        let broker = self.ctx.broker.clone();
        let last = self.last.clone();
        let plugin = uuid.clone();
        let topic = cpu_load_topic(&config.subsystem);
        let interval = Duration::from_millis(config.interval_ms.max(100));
        let path = config.loadavg_path.clone();
        self.tasks.attach(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match sample(&path).await {
                    Ok(load) => {
                        *last.write().unwrap_or_else(|e| e.into_inner()) = load.clone();
                        broker.publish(
                            &topic,
                            EventRecord::new(topic.clone(), plugin.clone(), "PLUGIN", "cpu_load", load),
                        );
                    }
                    Err(err) => debug!(target: "edge.driver.monitor", plugin = %plugin, error = %err, "load sample failed"),
                }
            }
        }));
        self.state.set(ResourceState::Up);
        info!(target: "edge.driver.monitor", plugin = %uuid, subsystem = %config.subsystem, "system monitor started");
        Ok(())
    }

    fn status(&self) -> ResourceState {
        self.state.get()
    }

    async fn stop(&self) {
        self.tasks.stop().await;
        self.state.set(ResourceState::Stop);
    }

    async fn on_ctrl(&self, cmd: &str, _args: &Value) -> Result<Value, ResourceError> {
        match cmd {
            "sample" => {
                let path = self
                    .config
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .as_ref()
                    .map(|c| c.loadavg_path.clone())
                    .unwrap_or_else(default_loadavg_path);
                sample(&path).await
            }
            other => Err(ResourceError::Unsupported(format!("ctrl: {}", other))),
        }
    }

    fn details(&self) -> Value {
        json!({ "last": self.last.read().unwrap_or_else(|e| e.into_inner()).clone() })
    }
}
