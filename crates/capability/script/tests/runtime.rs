use edge_cache::InterCache;
use edge_script::{STORE_NAMESPACE, ScriptError, ScriptInput, ScriptLibrary, ScriptRuntime, TargetSink, VmState};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    submitted: Mutex<Vec<(String, String, String)>>,
}

impl TargetSink for RecordingSink {
    fn submit(&self, kind: &str, target: &str, payload: String) -> Result<(), String> {
        if target == "missing" {
            return Err(format!("target not found: {}", target));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((kind.to_string(), target.to_string(), payload));
        Ok(())
    }
}

fn runtime_with_sink() -> (Arc<ScriptRuntime>, Arc<RecordingSink>, Arc<InterCache<String>>) {
    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(InterCache::new());
    let library = ScriptLibrary::new(Arc::clone(&store), sink.clone());
    (Arc::new(ScriptRuntime::new(library)), sink, store)
}

#[test]
fn rules_do_not_share_globals() {
    let (runtime, _, _) = runtime_with_sink();
    runtime
        .load_script("r1", "counter = 0\nfunction Action(x) counter = counter + 1 return counter end")
        .unwrap();
    runtime
        .load_script("r2", "function Action(x) return tostring(counter) end")
        .unwrap();

    assert_eq!(runtime.execute("r1", &ScriptInput::Nil).unwrap().as_deref(), Some("1"));
    assert_eq!(runtime.execute("r1", &ScriptInput::Nil).unwrap().as_deref(), Some("2"));
    assert_eq!(runtime.execute("r2", &ScriptInput::Nil).unwrap().as_deref(), Some("nil"));
}

#[test]
fn concurrent_execution_of_same_rule_is_busy() {
    let (runtime, _, _) = runtime_with_sink();
    runtime
        .load_script("slow", "function Action(x) time.sleep(300) return x end")
        .unwrap();

    let background = Arc::clone(&runtime);
    let first = std::thread::spawn(move || background.execute("slow", &ScriptInput::from("a")));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(runtime.state("slow"), Some(VmState::Running));
    let second = runtime.execute("slow", &ScriptInput::from("b"));
    assert!(matches!(second, Err(ScriptError::Busy(_))));

    assert_eq!(first.join().unwrap().unwrap().as_deref(), Some("a"));
    assert_eq!(runtime.state("slow"), Some(VmState::Idle));
}

#[test]
fn runtime_error_resets_vm() {
    let (runtime, _, _) = runtime_with_sink();
    runtime
        .load_script("boom", "function Action(x) if x == 'bad' then error('kaput') end return x end")
        .unwrap();
    let err = runtime.execute("boom", &ScriptInput::from("bad")).unwrap_err();
    assert!(err.to_string().contains("kaput"));
    assert_eq!(runtime.execute("boom", &ScriptInput::from("ok")).unwrap().as_deref(), Some("ok"));
}

#[test]
fn data_functions_reach_sink_unless_dry_run() {
    let (runtime, sink, _) = runtime_with_sink();
    runtime
        .load_script(
            "fwd",
            r#"
function Action(x)
    local err = data:ToMqtt("t1", x)
    if err ~= nil then return err end
    data:ToHttp("t2", {value = x})
    return data:ToUart("missing", x)
end
"#,
        )
        .unwrap();

    let ret = runtime.execute("fwd", &ScriptInput::from("42")).unwrap();
    assert_eq!(ret.as_deref(), Some("target not found: missing"));
    {
        let submitted = sink.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0], ("MQTT".into(), "t1".into(), "42".into()));
        assert_eq!(submitted[1].0, "HTTP");
        assert_eq!(submitted[1].2, r#"{"value":"42"}"#);
    }

    let ret = runtime.execute_dry_run("fwd", &ScriptInput::from("43")).unwrap();
    assert_eq!(ret, None);
    assert_eq!(sink.submitted.lock().unwrap().len(), 2);
}

#[test]
fn store_is_process_wide() {
    let (runtime, _, store) = runtime_with_sink();
    runtime
        .load_script("writer", "function Action(x) store.set('k', x) end")
        .unwrap();
    runtime
        .load_script("reader", "function Action(x) return store.get('k') end")
        .unwrap();
    assert_eq!(runtime.execute("writer", &ScriptInput::from("v1")).unwrap(), None);
    assert_eq!(runtime.execute("reader", &ScriptInput::Nil).unwrap().as_deref(), Some("v1"));
    assert_eq!(store.get(STORE_NAMESPACE, "k").as_deref(), Some("v1"));
}

#[test]
fn library_helpers() {
    let (runtime, _, _) = runtime_with_sink();
    runtime
        .load_script(
            "lib",
            r#"
function Action(x)
    local id = uuid.make()
    local decoded = json.decode('{"a": 2}')
    return self.ruleUUID() .. ":" .. #id .. ":" .. decoded.a .. ":" .. x.k .. ":" .. tostring(time.now() > 0)
end
"#,
        )
        .unwrap();
    let input = ScriptInput::from(serde_json::json!({"k": 5}));
    assert_eq!(runtime.execute("lib", &input).unwrap().as_deref(), Some("lib:36:2:5:true"));
}

#[test]
fn hooks_are_optional() {
    let (runtime, _, store) = runtime_with_sink();
    runtime
        .load_script(
            "hooks",
            "function Action(x) return x end\nfunction Failed(err) store.set('last_error', err) end",
        )
        .unwrap();
    runtime.on_success("hooks").unwrap();
    runtime.on_failed("hooks", "oops").unwrap();
    assert_eq!(store.get(STORE_NAMESPACE, "last_error").as_deref(), Some("oops"));
    assert!(matches!(runtime.on_success("nope"), Err(ScriptError::NotFound(_))));
}

#[test]
fn remove_script_drops_vm() {
    let (runtime, _, _) = runtime_with_sink();
    runtime.load_script("tmp", "function Action(x) return x end").unwrap();
    assert!(runtime.remove_script("tmp"));
    assert!(!runtime.remove_script("tmp"));
    assert!(matches!(
        runtime.execute("tmp", &ScriptInput::Nil),
        Err(ScriptError::NotFound(_))
    ));
}
