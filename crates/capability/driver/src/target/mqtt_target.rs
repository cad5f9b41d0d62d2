//! MQTT 发布目标

use crate::context::parse_config;
use crate::mqtt::MqttConfig;
use crate::target::{Outbox, default_queue_size, with_stats};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::ResourceState;
use edge_resource::{Resource, ResourceError, StateCell};
use rumqttc::AsyncClient;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MqttTargetConfig {
    #[serde(flatten)]
    connection: MqttConfig,
    /// 发布主题
    topic: String,
    #[serde(default)]
    retain: bool,
    #[serde(default = "default_queue_size")]
    queue_size: usize,
}

pub struct MqttTarget {
    uuid: RwLock<String>,
    config: RwLock<Option<MqttTargetConfig>>,
    outbox: Outbox,
    state: StateCell,
    tasks: TaskSlot,
}

impl MqttTarget {
    pub fn new() -> Self {
        Self {
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            outbox: Outbox::default(),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }

    /// 已进入发布队列的消息数
    pub fn submitted(&self) -> u64 {
        self.outbox.submitted()
    }
}

impl Default for MqttTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for MqttTarget {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: MqttTargetConfig = parse_config(config)?;
        if parsed.connection.host.is_empty() {
            return Err(ResourceError::BadConfig("host is required".to_string()));
        }
        if parsed.topic.is_empty() || parsed.topic.contains(['#', '+']) {
            return Err(ResourceError::BadConfig(format!("invalid publish topic: {}", parsed.topic)));
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
            .ok_or_else(|| ResourceError::BadConfig("target is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();

        let (client, mut eventloop) = AsyncClient::new(config.connection.options("target"), 10);
        let mut queue = self.outbox.open(config.queue_size);
        let token = self.tasks.begin(&cancel);

        let loop_token = token.clone();
        let target = uuid.clone();
        self.tasks.attach(tokio::spawn(async move {
            loop {
                let polled = tokio::select! {
                    _ = loop_token.cancelled() => break,
                    polled = eventloop.poll() => polled,
                };
                if let Err(err) = polled {
                    warn!(target: "edge.driver.mqtt", target_uuid = %target, "mqtt target eventloop error: {}", err);
                    tokio::select! {
                        _ = loop_token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }));

        let target = uuid.clone();
        let qos = config.connection.qos();
        let topic = config.topic.clone();
        let retain = config.retain;
        self.tasks.attach(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = token.cancelled() => break,
                    payload = queue.recv() => payload,
                };
                let Some(payload) = payload else {
                    break;
                };
                let published = tokio::select! {
                    _ = token.cancelled() => break,
                    published = client.publish(topic.clone(), qos, retain, payload.into_bytes()) => published,
                };
                if let Err(err) = published {
                    warn!(target: "edge.driver.mqtt", target_uuid = %target, "mqtt publish error: {}", err);
                }
            }
            let _ = client.try_disconnect();
        }));

        self.state.set(ResourceState::Up);
        info!(target: "edge.driver.mqtt", target_uuid = %uuid, topic = %config.topic, "mqtt target started");
        Ok(())
    }

    fn status(&self) -> ResourceState {
        self.state.get()
    }

    async fn stop(&self) {
        self.outbox.close();
        self.tasks.stop().await;
        self.state.set(ResourceState::Stop);
    }

    fn details(&self) -> Value {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        let details = match config {
            Some(c) => json!({
                "host": c.connection.host,
                "port": c.connection.port,
                "topic": c.topic,
            }),
            None => json!({}),
        };
        with_stats(details, &self.outbox)
    }

    fn to(&self, payload: String) -> Result<(), ResourceError> {
        self.outbox.submit(payload)
    }
}
