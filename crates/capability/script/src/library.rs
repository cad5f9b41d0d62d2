use domain::now_epoch_ms;
use edge_cache::InterCache;
use mlua::{Lua, LuaSerdeExt, Table, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 脚本 `store.*` 使用的缓存 namespace。
pub const STORE_NAMESPACE: &str = "script.store";

const MAX_SLEEP_MS: u64 = 10_000;

/// 脚本向北向目标投递数据的出口。
///
/// `kind` 为目标类型标签（`MQTT` / `HTTP` / `TDENGINE` / `UART`），
/// 实现方需确认目标存在且类型一致后入队，不得阻塞。
pub trait TargetSink: Send + Sync {
    fn submit(&self, kind: &str, target: &str, payload: String) -> Result<(), String>;
}

/// 丢弃所有投递，用于语法校验
pub struct NoopSink;

impl TargetSink for NoopSink {
    fn submit(&self, _kind: &str, _target: &str, _payload: String) -> Result<(), String> {
        Ok(())
    }
}

/// 注入到每个 VM 的共享依赖
#[derive(Clone)]
pub struct ScriptLibrary {
    pub store: Arc<InterCache<String>>,
    pub sink: Arc<dyn TargetSink>,
}

impl ScriptLibrary {
    pub fn new(store: Arc<InterCache<String>>, sink: Arc<dyn TargetSink>) -> Self {
        Self { store, sink }
    }

    pub fn detached() -> Self {
        Self::new(Arc::new(InterCache::new()), Arc::new(NoopSink))
    }

    pub(crate) fn install(&self, lua: &Lua, rule_uuid: &str, dry_run: Arc<AtomicBool>) -> mlua::Result<()> {
        let globals = lua.globals();

        let uuid_table = lua.create_table()?;
        uuid_table.set(
            "make",
            lua.create_function(|_, ()| Ok(uuid::Uuid::new_v4().to_string()))?,
        )?;
        globals.set("uuid", uuid_table)?;

        globals.set("store", self.store_table(lua)?)?;
        globals.set("data", self.data_table(lua, rule_uuid, dry_run)?)?;
        globals.set("json", json_table(lua)?)?;
        globals.set("time", time_table(lua)?)?;
        globals.set("log", log_table(lua, rule_uuid)?)?;

        let self_table = lua.create_table()?;
        let rule = rule_uuid.to_string();
        self_table.set("ruleUUID", lua.create_function(move |_, ()| Ok(rule.clone()))?)?;
        globals.set("self", self_table)?;
        Ok(())
    }

    fn store_table(&self, lua: &Lua) -> mlua::Result<Table> {
        let table = lua.create_table()?;

        let store = Arc::clone(&self.store);
        table.set(
            "set",
            lua.create_function(move |_, (key, value): (String, String)| {
                store.set(STORE_NAMESPACE, &key, value, 0);
                Ok(())
            })?,
        )?;

        let store = Arc::clone(&self.store);
        table.set(
            "setWithDuration",
            lua.create_function(move |_, (key, value, seconds): (String, String, u64)| {
                store.set(STORE_NAMESPACE, &key, value, seconds);
                Ok(())
            })?,
        )?;

        let store = Arc::clone(&self.store);
        table.set(
            "get",
            lua.create_function(move |_, key: String| Ok(store.get(STORE_NAMESPACE, &key)))?,
        )?;

        let store = Arc::clone(&self.store);
        table.set(
            "delete",
            lua.create_function(move |_, key: String| {
                store.delete(STORE_NAMESPACE, &key);
                Ok(())
            })?,
        )?;
        Ok(table)
    }

    fn data_table(&self, lua: &Lua, rule_uuid: &str, dry_run: Arc<AtomicBool>) -> mlua::Result<Table> {
        let table = lua.create_table()?;
        for (method, kind) in [
            ("ToMqtt", "MQTT"),
            ("ToHttp", "HTTP"),
            ("ToTdengine", "TDENGINE"),
            ("ToUart", "UART"),
        ] {
            let sink = Arc::clone(&self.sink);
            let dry_run = Arc::clone(&dry_run);
            let rule = rule_uuid.to_string();
            table.set(
                method,
                lua.create_function(move |lua, (_this, target, payload): (Value, String, Value)| {
                    let payload = stringify(lua, payload)?.unwrap_or_default();
                    if dry_run.load(Ordering::Acquire) {
                        debug!(target: "edge.script", rule = %rule, target_uuid = %target, kind, "dry run, payload not delivered");
                        return Ok(None::<String>);
                    }
                    match sink.submit(kind, &target, payload) {
                        Ok(()) => Ok(None),
                        Err(e) => Ok(Some(e)),
                    }
                })?,
            )?;
        }
        Ok(table)
    }
}

fn json_table(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set(
        "encode",
        lua.create_function(|lua, value: Value| {
            let json: serde_json::Value = lua.from_value(value)?;
            serde_json::to_string(&json).map_err(mlua::Error::external)
        })?,
    )?;
    table.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let json: serde_json::Value = serde_json::from_str(&text).map_err(mlua::Error::external)?;
            lua.to_value(&json)
        })?,
    )?;
    Ok(table)
}

fn time_table(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("now", lua.create_function(|_, ()| Ok(now_epoch_ms()))?)?;
    table.set(
        "sleep",
        lua.create_function(|_, ms: u64| {
            std::thread::sleep(Duration::from_millis(ms.min(MAX_SLEEP_MS)));
            Ok(())
        })?,
    )?;
    Ok(table)
}

fn log_table(lua: &Lua, rule_uuid: &str) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    let rule = rule_uuid.to_string();
    table.set(
        "debug",
        lua.create_function(move |_, msg: String| {
            debug!(target: "edge.script", rule = %rule, "{}", msg);
            Ok(())
        })?,
    )?;
    let rule = rule_uuid.to_string();
    table.set(
        "info",
        lua.create_function(move |_, msg: String| {
            info!(target: "edge.script", rule = %rule, "{}", msg);
            Ok(())
        })?,
    )?;
    let rule = rule_uuid.to_string();
    table.set(
        "warn",
        lua.create_function(move |_, msg: String| {
            warn!(target: "edge.script", rule = %rule, "{}", msg);
            Ok(())
        })?,
    )?;
    let rule = rule_uuid.to_string();
    table.set(
        "error",
        lua.create_function(move |_, msg: String| {
            error!(target: "edge.script", rule = %rule, "{}", msg);
            Ok(())
        })?,
    )?;
    Ok(table)
}

/// 把脚本返回值转成字符串；nil → None，table → JSON。
pub(crate) fn stringify(lua: &Lua, value: Value) -> mlua::Result<Option<String>> {
    Ok(match value {
        Value::Nil => None,
        Value::String(s) => Some(s.to_string_lossy()),
        Value::Boolean(v) => Some(v.to_string()),
        Value::Integer(v) => Some(v.to_string()),
        Value::Number(v) => Some(v.to_string()),
        Value::Table(_) => {
            let json: serde_json::Value = lua.from_value(value)?;
            Some(json.to_string())
        }
        other => Some(format!("{:?}", other)),
    })
}
