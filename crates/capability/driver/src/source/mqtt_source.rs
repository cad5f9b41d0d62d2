//! MQTT 订阅源

use crate::context::{DriverContext, parse_config};
use crate::mqtt::MqttConfig;
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::{Origin, ResourceState};
use edge_resource::{Resource, ResourceError, StateCell};
use rumqttc::{AsyncClient, Event, Packet};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MqttSourceConfig {
    #[serde(flatten)]
    connection: MqttConfig,
    topics: Vec<String>,
}

pub struct MqttSource {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<MqttSourceConfig>>,
    state: StateCell,
    tasks: TaskSlot,
}

impl MqttSource {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }
}

#[async_trait]
impl Resource for MqttSource {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: MqttSourceConfig = parse_config(config)?;
        if parsed.connection.host.is_empty() {
            return Err(ResourceError::BadConfig("host is required".to_string()));
        }
        if parsed.topics.is_empty() {
            return Err(ResourceError::BadConfig("topics is empty".to_string()));
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
            .ok_or_else(|| ResourceError::BadConfig("source is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();

        let (client, mut eventloop) = AsyncClient::new(config.connection.options("source"), 10);

        let token = self.tasks.begin(&cancel);
        let ctx = self.ctx.clone();
        let source = uuid.clone();
        let qos = config.connection.qos();
        let topics = config.topics.clone();
        self.tasks.attach(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = eventloop.poll() => event,
                };
                match event {
                    // 每次（重）连接后重新订阅
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        for topic in &topics {
                            if let Err(err) = client.try_subscribe(topic.clone(), qos) {
                                warn!(target: "edge.driver.mqtt", source = %source, topic = %topic, "mqtt subscribe error: {}", err);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(target: "edge.driver.mqtt", source = %source, topic = %publish.topic, bytes = publish.payload.len(), "mqtt message");
                        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                        ctx.emit(Origin::Source(source.clone()), payload);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "edge.driver.mqtt", source = %source, "mqtt source eventloop error: {}", err);
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        }
                    }
                }
            }
            let _ = client.try_disconnect();
        }));
        self.state.set(ResourceState::Up);
        info!(target: "edge.driver.mqtt", source = %uuid, host = %config.connection.host, port = config.connection.port, "mqtt source started");
        Ok(())
    }

    fn status(&self) -> ResourceState {
        self.state.get()
    }

    async fn stop(&self) {
        self.tasks.stop().await;
        self.state.set(ResourceState::Stop);
    }

    fn details(&self) -> Value {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        match config {
            Some(c) => json!({
                "host": c.connection.host,
                "port": c.connection.port,
                "topics": c.topics,
            }),
            None => json!({}),
        }
    }
}
