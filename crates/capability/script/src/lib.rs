//! # 规则脚本运行时
//!
//! 每条规则独占一个 Lua 5.4 VM（只开放 `table/string/math/utf8`），入口为全局函数 `Action(data)`；
//! 可选钩子 `Success()` 与 `Failed(err)`。
//!
//! VM 状态 `Idle → Running → Done → Idle`，运行中再次进入直接返回 [`ScriptError::Busy`]。
//!
//! 注入库：
//! - `uuid.make()`
//! - `store.set / get / delete / setWithDuration`
//! - `data:ToMqtt / ToHttp / ToTdengine / ToUart(targetUUID, payload)`，返回错误字符串或 nil
//! - `json.encode / json.decode`、`time.now / time.sleep`、`log.debug / info / warn / error`
//! - `self.ruleUUID()`

mod error;
mod input;
mod library;
mod runtime;

pub use error::ScriptError;
pub use input::ScriptInput;
pub use library::{NoopSink, STORE_NAMESPACE, ScriptLibrary, TargetSink};
pub use runtime::{ScriptRuntime, VmState};
