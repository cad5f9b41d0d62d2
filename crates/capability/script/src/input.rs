use mlua::{Lua, Value};
use std::collections::BTreeMap;

/// 传给 `Action` 的参数。
///
/// 映射规则：字符串/字节 → string，整数/浮点 → number，map → 值转字符串的 table，
/// list → 下标从 1 开始的 table，`Nil` → nil。
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptInput {
    Nil,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Str(String),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, String>),
    List(Vec<ScriptInput>),
}

impl ScriptInput {
    pub(crate) fn to_lua(&self, lua: &Lua) -> mlua::Result<Value> {
        Ok(match self {
            Self::Nil => Value::Nil,
            Self::Bool(v) => Value::Boolean(*v),
            Self::Integer(v) => Value::Integer(*v),
            Self::Number(v) => Value::Number(*v),
            Self::Str(v) => Value::String(lua.create_string(v)?),
            Self::Bytes(v) => Value::String(lua.create_string(v)?),
            Self::Map(map) => {
                let table = lua.create_table()?;
                for (key, value) in map {
                    table.set(key.as_str(), value.as_str())?;
                }
                Value::Table(table)
            }
            Self::List(items) => {
                let table = lua.create_table()?;
                for (index, item) in items.iter().enumerate() {
                    table.set(index + 1, item.to_lua(lua)?)?;
                }
                Value::Table(table)
            }
        })
    }
}

impl From<&str> for ScriptInput {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ScriptInput {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<serde_json::Value> for ScriptInput {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Nil,
            serde_json::Value::Bool(v) => Self::Bool(v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => Self::Integer(v),
                None => Self::Number(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(v) => Self::Str(v),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(key, value)| {
                        let text = match value {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, text)
                    })
                    .collect(),
            ),
        }
    }
}
