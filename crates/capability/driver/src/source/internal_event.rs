//! 内部事件源：把事件总线上的记录转入规则引擎（进程内单例）

use crate::context::{DriverContext, parse_config};
use async_trait::async_trait;
use domain::{Origin, ResourceState};
use edge_bus::Subscriber;
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalEventConfig {
    /// 订阅的主题模式，默认全部事件
    #[serde(default = "default_topics")]
    topics: Vec<String>,
}

fn default_topics() -> Vec<String> {
    vec!["event.#".to_string(), "system.#".to_string()]
}

pub struct InternalEventSource {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<InternalEventConfig>>,
    state: StateCell,
}

impl InternalEventSource {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            state: StateCell::default(),
        }
    }
}

#[async_trait]
impl Resource for InternalEventSource {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: InternalEventConfig = parse_config(config)?;
        if parsed.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(ResourceError::BadConfig("empty topic pattern".to_string()));
        }
        *self.uuid.write().unwrap_or_else(|e| e.into_inner()) = uuid.to_string();
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Some(parsed);
        Ok(())
    }

    async fn start(&self, _cancel: CancellationToken) -> Result<(), ResourceError> {
        let config = self
            .config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ResourceError::BadConfig("source is not initialized".to_string()))?;
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();

        // 订阅以 UUID 去重，重复启动不会重复投递
        self.ctx.broker.unsubscribe(&uuid);
        for topic in &config.topics {
            let ctx = self.ctx.clone();
            let source = uuid.clone();
            let subscriber = Subscriber::new(uuid.clone(), move |topic, record| {
                let payload = serde_json::to_value(record)
                    .map(|mut value| {
                        if let Value::Object(fields) = &mut value {
                            fields.insert("topic".to_string(), Value::String(topic.to_string()));
                        }
                        value
                    })
                    .unwrap_or(Value::Null);
                ctx.emit(Origin::Source(source.clone()), payload.to_string());
            });
            self.ctx.broker.subscribe(topic, subscriber);
        }
        self.state.set(ResourceState::Up);
        info!(target: "edge.driver.internal", source = %uuid, topics = ?config.topics, "internal event bridge started");
        Ok(())
    }

    fn status(&self) -> ResourceState {
        self.state.get()
    }

    async fn stop(&self) {
        let uuid = self.uuid.read().unwrap_or_else(|e| e.into_inner()).clone();
        self.ctx.broker.unsubscribe(&uuid);
        self.state.set(ResourceState::Stop);
    }

    fn details(&self) -> Value {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        json!({ "topics": config.map(|c| c.topics).unwrap_or_default() })
    }
}
