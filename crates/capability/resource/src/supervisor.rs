use crate::manager::ResourceManager;
use domain::{EventRecord, ResourceState};
use edge_bus::EventBroker;
use edge_cache::{PointCache, last_fault};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub interval: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_retries: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// 一次巡检的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub reloaded: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

/// 资源守护：周期巡检，`DOWN` 的资源按次数上限与退避重载。
pub struct Supervisor {
    manager: Arc<ResourceManager>,
    config: SupervisorConfig,
    attempts: Mutex<HashMap<String, u32>>,
    broker: Option<Arc<EventBroker>>,
    faults: Option<Arc<PointCache>>,
}

impl Supervisor {
    pub fn new(manager: Arc<ResourceManager>, config: SupervisorConfig) -> Self {
        Self {
            manager,
            config,
            attempts: Mutex::new(HashMap::new()),
            broker: None,
            faults: None,
        }
    }

    /// 重载前向总线发布 `event.<class>.down.<uuid>`，载荷带缓存中的最后一次错误。
    pub fn with_events(mut self, broker: Arc<EventBroker>, faults: Arc<PointCache>) -> Self {
        self.broker = Some(broker);
        self.faults = Some(faults);
        self
    }

    pub fn attempts(&self, uuid: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(uuid)
            .copied()
            .unwrap_or(0)
    }

    fn set_attempts(&self, uuid: &str, value: u32) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        if value == 0 {
            attempts.remove(uuid);
        } else {
            attempts.insert(uuid.to_string(), value);
        }
    }

    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for (worker, state) in self.manager.list() {
            let uuid = worker.uuid;
            match state {
                ResourceState::Down => {
                    let attempts = self.attempts(&uuid);
                    if attempts >= self.config.max_retries {
                        warn!(target: "edge.supervisor", uuid = %uuid, attempts, "max reload attempts reached, skipped");
                        report.skipped.push(uuid);
                        continue;
                    }
                    self.publish_down(&uuid);
                    match self.manager.reload_resource(&uuid).await {
                        Ok(()) => {
                            self.set_attempts(&uuid, 0);
                            edge_telemetry::record_resource_reload();
                            info!(target: "edge.supervisor", class = %self.manager.class(), uuid = %uuid, "resource reloaded");
                            report.reloaded.push(uuid);
                        }
                        Err(e) => {
                            self.set_attempts(&uuid, attempts + 1);
                            edge_telemetry::record_resource_reload_failure();
                            warn!(target: "edge.supervisor", uuid = %uuid, attempt = attempts + 1, error = %e, "resource reload failed");
                            report.failed.push(uuid);
                            tokio::time::sleep(self.config.backoff).await;
                        }
                    }
                }
                ResourceState::Up => self.set_attempts(&uuid, 0),
                ResourceState::Pending
                | ResourceState::Pause
                | ResourceState::Stop
                | ResourceState::Disable => {}
            }
        }
        report
    }

    fn publish_down(&self, uuid: &str) {
        let Some(broker) = &self.broker else {
            return;
        };
        let last_error = self
            .faults
            .as_deref()
            .and_then(|faults| last_fault(faults, uuid))
            .unwrap_or_default();
        let event = EventRecord::resource_down(self.manager.class(), uuid, &last_error);
        let topic = event.topic.clone();
        broker.publish(&topic, event);
    }

    /// 后台巡检，`cancel` 后退出。
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            info!(target: "edge.supervisor", class = %self.manager.class(), "supervisor started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            info!(target: "edge.supervisor", class = %self.manager.class(), "supervisor stopped");
        })
    }
}
