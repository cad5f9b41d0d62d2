use crate::error::ScriptError;
use crate::input::ScriptInput;
use crate::library::{ScriptLibrary, stringify};
use mlua::{Function, Lua, LuaOptions, StdLib, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

const ACTION: &str = "Action";
const SUCCESS_HOOK: &str = "Success";
const FAILED_HOOK: &str = "Failed";

/// VM 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Idle,
    Running,
    Done,
}

impl VmState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Done,
            _ => Self::Idle,
        }
    }
}

struct Compiled {
    lua: Lua,
    action: Function,
}

struct RuleVm {
    compiled: Mutex<Compiled>,
    state: AtomicU8,
    dry_run: Arc<AtomicBool>,
}

impl RuleVm {
    fn enter(&self, id: &str) -> Result<(), ScriptError> {
        self.state
            .compare_exchange(
                VmState::Idle as u8,
                VmState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| {
                edge_telemetry::record_script_busy();
                ScriptError::Busy(id.to_string())
            })
    }

    fn leave(&self) {
        self.state.store(VmState::Done as u8, Ordering::Release);
        self.state.store(VmState::Idle as u8, Ordering::Release);
    }
}

fn sandbox() -> Result<Lua, ScriptError> {
    Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
        LuaOptions::default(),
    )
    .map_err(|e| ScriptError::Compile(e.to_string()))
}

fn compile(
    id: &str,
    source: &str,
    library: &ScriptLibrary,
    dry_run: Arc<AtomicBool>,
) -> Result<Compiled, ScriptError> {
    let lua = sandbox()?;
    library
        .install(&lua, id, dry_run)
        .map_err(|e| ScriptError::Compile(e.to_string()))?;
    lua.load(source)
        .set_name(id)
        .exec()
        .map_err(|e| ScriptError::Compile(e.to_string()))?;
    let action = match lua.globals().get::<Value>(ACTION) {
        Ok(Value::Function(action)) => action,
        _ => return Err(ScriptError::MissingAction),
    };
    Ok(Compiled { lua, action })
}

/// 每条规则一个 VM 的脚本运行时
pub struct ScriptRuntime {
    vms: RwLock<HashMap<String, Arc<RuleVm>>>,
    library: ScriptLibrary,
}

impl ScriptRuntime {
    pub fn new(library: ScriptLibrary) -> Self {
        Self {
            vms: RwLock::new(HashMap::new()),
            library,
        }
    }

    /// 在临时 VM 中编译，检查 `Action` 存在；不影响任何在线 VM。
    pub fn verify(&self, source: &str) -> Result<(), ScriptError> {
        let dry_run = Arc::new(AtomicBool::new(true));
        compile("verify", source, &ScriptLibrary::detached(), dry_run).map(|_| ())
    }

    /// 为规则创建新 VM；同 id 的旧 VM 被替换。
    pub fn load_script(&self, id: &str, source: &str) -> Result<(), ScriptError> {
        let dry_run = Arc::new(AtomicBool::new(false));
        let compiled = compile(id, source, &self.library, Arc::clone(&dry_run))?;
        let vm = Arc::new(RuleVm {
            compiled: Mutex::new(compiled),
            state: AtomicU8::new(VmState::Idle as u8),
            dry_run,
        });
        self.vms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), vm);
        info!(target: "edge.script", rule = %id, "script loaded");
        Ok(())
    }

    pub fn remove_script(&self, id: &str) -> bool {
        let removed = self
            .vms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        if removed {
            info!(target: "edge.script", rule = %id, "script removed");
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vms.read().unwrap_or_else(|e| e.into_inner()).contains_key(id)
    }

    pub fn state(&self, id: &str) -> Option<VmState> {
        self.vm(id)
            .ok()
            .map(|vm| VmState::from_u8(vm.state.load(Ordering::Acquire)))
    }

    fn vm(&self, id: &str) -> Result<Arc<RuleVm>, ScriptError> {
        self.vms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| ScriptError::NotFound(id.to_string()))
    }

    /// 调用 `Action(input)`，返回字符串化的结果；nil 返回 `None`。
    ///
    /// 同步执行，调用方应放在阻塞线程池中。
    pub fn execute(&self, id: &str, input: &ScriptInput) -> Result<Option<String>, ScriptError> {
        self.run(id, input, false)
    }

    /// 与 [`execute`](Self::execute) 相同，但 `data:ToX` 只记录日志不投递。
    pub fn execute_dry_run(&self, id: &str, input: &ScriptInput) -> Result<Option<String>, ScriptError> {
        self.run(id, input, true)
    }

    fn run(&self, id: &str, input: &ScriptInput, dry_run: bool) -> Result<Option<String>, ScriptError> {
        let vm = self.vm(id)?;
        vm.enter(id)?;
        vm.dry_run.store(dry_run, Ordering::Release);
        let result = {
            let compiled = vm.compiled.lock().unwrap_or_else(|e| e.into_inner());
            input
                .to_lua(&compiled.lua)
                .and_then(|arg| compiled.action.call::<Value>(arg))
                .and_then(|ret| stringify(&compiled.lua, ret))
                .map_err(|e| ScriptError::Runtime(e.to_string()))
        };
        vm.dry_run.store(false, Ordering::Release);
        vm.leave();
        if let Err(e) = &result {
            debug!(target: "edge.script", rule = %id, error = %e, "script execution failed");
        }
        result
    }

    /// 调用可选的 `Success()` 钩子。
    pub fn on_success(&self, id: &str) -> Result<(), ScriptError> {
        self.hook(id, SUCCESS_HOOK, None)
    }

    /// 调用可选的 `Failed(err)` 钩子。
    pub fn on_failed(&self, id: &str, err: &str) -> Result<(), ScriptError> {
        self.hook(id, FAILED_HOOK, Some(err))
    }

    fn hook(&self, id: &str, name: &str, arg: Option<&str>) -> Result<(), ScriptError> {
        let vm = self.vm(id)?;
        vm.enter(id)?;
        let result = {
            let compiled = vm.compiled.lock().unwrap_or_else(|e| e.into_inner());
            match compiled.lua.globals().get::<Value>(name) {
                Ok(Value::Function(hook)) => {
                    let called = match arg {
                        Some(arg) => hook.call::<()>(arg),
                        None => hook.call::<()>(()),
                    };
                    called.map_err(|e| ScriptError::Runtime(e.to_string()))
                }
                _ => Ok(()),
            }
        };
        vm.leave();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_rejects_missing_action() {
        let runtime = ScriptRuntime::new(ScriptLibrary::detached());
        assert!(runtime.verify("function Action(x) return x end").is_ok());
        assert!(matches!(runtime.verify("x = 1"), Err(ScriptError::MissingAction)));
        assert!(matches!(runtime.verify("Action = 1"), Err(ScriptError::MissingAction)));
        assert!(matches!(runtime.verify("function Action("), Err(ScriptError::Compile(_))));
        assert!(!runtime.contains("verify"));
    }

    #[test]
    fn sandbox_hides_os_and_io() {
        let runtime = ScriptRuntime::new(ScriptLibrary::detached());
        runtime
            .load_script("r", "function Action(x) return tostring(os) .. tostring(io) end")
            .unwrap();
        assert_eq!(
            runtime.execute("r", &ScriptInput::Nil).unwrap().as_deref(),
            Some("nilnil")
        );
    }
}
