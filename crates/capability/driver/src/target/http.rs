//! HTTP 推送目标：每条数据一次 POST

use crate::context::parse_config;
use crate::target::{Outbox, default_queue_size, with_stats};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::ResourceState;
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpTargetConfig {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout")]
    timeout_ms: u64,
    #[serde(default = "default_queue_size")]
    queue_size: usize,
}

fn default_timeout() -> u64 {
    5000
}

pub struct HttpTarget {
    uuid: RwLock<String>,
    config: RwLock<Option<HttpTargetConfig>>,
    outbox: Outbox,
    state: StateCell,
    tasks: TaskSlot,
}

impl HttpTarget {
    pub fn new() -> Self {
        Self {
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            outbox: Outbox::default(),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }
}

impl Default for HttpTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for HttpTarget {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: HttpTargetConfig = parse_config(config)?;
        if !(parsed.url.starts_with("http://") || parsed.url.starts_with("https://")) {
            return Err(ResourceError::BadConfig(format!("invalid url: {}", parsed.url)));
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
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|e| ResourceError::Internal(e.to_string()))?;

        let mut queue = self.outbox.open(config.queue_size);
        let token = self.tasks.begin(&cancel);
        let target = uuid.clone();
        let url = config.url.clone();
        let headers = config.headers.clone();
        self.tasks.attach(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = token.cancelled() => break,
                    payload = queue.recv() => payload,
                };
                let Some(payload) = payload else {
                    break;
                };
                let mut request = client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(payload);
                for (name, value) in &headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                let sent = tokio::select! {
                    _ = token.cancelled() => break,
                    sent = request.send() => sent,
                };
                match sent.and_then(|response| response.error_for_status()) {
                    Ok(response) => {
                        debug!(target: "edge.driver.http", target_uuid = %target, status = %response.status(), "http push ok");
                    }
                    Err(err) => {
                        warn!(target: "edge.driver.http", target_uuid = %target, "http push error: {}", err);
                    }
                }
            }
        }));
        self.state.set(ResourceState::Up);
        info!(target: "edge.driver.http", target_uuid = %uuid, url = %config.url, "http target started");
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
        let details = json!({ "url": config.map(|c| c.url) });
        with_stats(details, &self.outbox)
    }

    fn to(&self, payload: String) -> Result<(), ResourceError> {
        self.outbox.submit(payload)
    }
}
