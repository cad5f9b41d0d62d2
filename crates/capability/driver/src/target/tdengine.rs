//! TDengine 目标（REST SQL 接口）
//!
//! 启动时执行建库 / 建表语句；每条数据按逗号切分后依次填入 `insertSql` 中的 `%v`。

use crate::context::{DriverContext, parse_config};
use crate::target::{Outbox, default_queue_size, with_stats};
use crate::worker::TaskSlot;
use async_trait::async_trait;
use domain::ResourceState;
use edge_resource::{Resource, ResourceError, StateCell};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PLACEHOLDER: &str = "%v";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TdengineConfig {
    /// 形如 `http://127.0.0.1:6041`
    url: String,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default = "default_password")]
    password: String,
    db_name: String,
    #[serde(default)]
    create_table_sql: String,
    insert_sql: String,
    #[serde(default = "default_timeout")]
    timeout_ms: u64,
    #[serde(default = "default_queue_size")]
    queue_size: usize,
}

fn default_username() -> String {
    "root".to_string()
}

fn default_password() -> String {
    "taosdata".to_string()
}

fn default_timeout() -> u64 {
    5000
}

/// 把逗号分隔的数据依次填入 `%v` 占位符。
pub(crate) fn fill_placeholders(template: &str, payload: &str) -> Result<String, String> {
    let values: Vec<&str> = payload.split(',').map(str::trim).collect();
    let slots = template.matches(PLACEHOLDER).count();
    if slots != values.len() {
        return Err(format!(
            "insert sql expects {} values, payload has {}",
            slots,
            values.len()
        ));
    }
    let mut sql = String::with_capacity(template.len() + payload.len());
    let mut rest = template;
    for value in values {
        let Some(at) = rest.find(PLACEHOLDER) else {
            break;
        };
        sql.push_str(&rest[..at]);
        sql.push_str(value);
        rest = &rest[at + PLACEHOLDER.len()..];
    }
    sql.push_str(rest);
    Ok(sql)
}

#[derive(Clone)]
struct RestSql {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl RestSql {
    async fn execute(&self, sql: String) -> Result<(), String> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .body(sql)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        let code = body.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if !status.is_success() || code != 0 {
            let desc = body.get("desc").and_then(Value::as_str).unwrap_or_default();
            return Err(format!("tdengine error {} ({}): {}", code, status, desc));
        }
        Ok(())
    }
}

pub struct TdengineTarget {
    ctx: DriverContext,
    uuid: RwLock<String>,
    config: RwLock<Option<TdengineConfig>>,
    outbox: Outbox,
    state: StateCell,
    tasks: TaskSlot,
}

impl TdengineTarget {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            uuid: RwLock::new(String::new()),
            config: RwLock::new(None),
            outbox: Outbox::default(),
            state: StateCell::default(),
            tasks: TaskSlot::default(),
        }
    }
}

#[async_trait]
impl Resource for TdengineTarget {
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError> {
        let parsed: TdengineConfig = parse_config(config)?;
        if parsed.db_name.is_empty() || !parsed.db_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ResourceError::BadConfig(format!("invalid dbName: {}", parsed.db_name)));
        }
        if !parsed.insert_sql.contains(PLACEHOLDER) {
            return Err(ResourceError::BadConfig("insertSql has no %v placeholder".to_string()));
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
        let base = config.url.trim_end_matches('/');
        let setup = RestSql {
            client,
            endpoint: format!("{}/rest/sql", base),
            username: config.username.clone(),
            password: config.password.clone(),
        };
        let writer = RestSql {
            endpoint: format!("{}/rest/sql/{}", base, config.db_name),
            ..setup.clone()
        };
        let mut prepared = setup
            .execute(format!("CREATE DATABASE IF NOT EXISTS {}", config.db_name))
            .await;
        if prepared.is_ok() && !config.create_table_sql.is_empty() {
            prepared = writer.execute(config.create_table_sql.clone()).await;
        }
        if let Err(err) = prepared {
            self.state.set(ResourceState::Down);
            self.ctx.fault(&uuid, &err);
            warn!(target: "edge.driver.tdengine", target_uuid = %uuid, "tdengine setup failed: {}", err);
            return Err(ResourceError::Transport(err));
        }

        let mut queue = self.outbox.open(config.queue_size);
        let token = self.tasks.begin(&cancel);
        let target = uuid.clone();
        let template = config.insert_sql.clone();
        self.tasks.attach(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = token.cancelled() => break,
                    payload = queue.recv() => payload,
                };
                let Some(payload) = payload else {
                    break;
                };
                let sql = match fill_placeholders(&template, &payload) {
                    Ok(sql) => sql,
                    Err(err) => {
                        warn!(target: "edge.driver.tdengine", target_uuid = %target, "payload rejected: {}", err);
                        continue;
                    }
                };
                let executed = tokio::select! {
                    _ = token.cancelled() => break,
                    executed = writer.execute(sql) => executed,
                };
                match executed {
                    Ok(()) => debug!(target: "edge.driver.tdengine", target_uuid = %target, "row inserted"),
                    Err(err) => warn!(target: "edge.driver.tdengine", target_uuid = %target, "insert failed: {}", err),
                }
            }
        }));
        self.state.set(ResourceState::Up);
        info!(target: "edge.driver.tdengine", target_uuid = %uuid, db = %config.db_name, "tdengine target started");
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
            Some(c) => json!({ "url": c.url, "dbName": c.db_name }),
            None => json!({}),
        };
        with_stats(details, &self.outbox)
    }

    fn to(&self, payload: String) -> Result<(), ResourceError> {
        self.outbox.submit(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_filled_in_order() {
        let sql = fill_placeholders("INSERT INTO meter VALUES (NOW, %v, %v)", "12.5, 220").unwrap();
        assert_eq!(sql, "INSERT INTO meter VALUES (NOW, 12.5, 220)");
    }

    #[test]
    fn placeholder_count_must_match() {
        assert!(fill_placeholders("INSERT INTO t VALUES (NOW, %v, %v)", "1").is_err());
        assert!(fill_placeholders("INSERT INTO t VALUES (NOW, %v)", "1,2").is_err());
    }
}
