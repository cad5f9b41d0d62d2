use api_contract::{PageQuery, ResourceRequest, RuleRequest, TestInjectRequest};
use async_trait::async_trait;
use domain::{
    DataOrder, DataPoint, DataType, ErrorKind, EventRecord, Origin, PointAddress, ResourceClass,
    ResourceState, ResourceWorker, Rule,
};
use edge_bus::{EventBroker, MessageQueue};
use edge_cache::{InterCache, PointCache, point_value};
use edge_driver::{
    DriverContext, DriverSettings, GENERIC_MODBUS_MASTER, ModbusConnector, ModbusMaster,
};
use edge_engine::{GatewayApi, RuleEngine};
use edge_protocol::{ModbusClientConfig, ModbusTransport, ProtocolError};
use edge_resource::Resource;
use edge_script::STORE_NAMESPACE;
use edge_storage::InMemoryPointStore;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 固定返回 `00 7B` 并计数的 Modbus 传输
struct CountingTransport {
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl ModbusTransport for CountingTransport {
    async fn read(&mut self, _slave: u8, _function: u8, _address: u16, _quantity: u16) -> Result<Vec<u8>, ProtocolError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0x00, 0x7B])
    }

    async fn write_registers(&mut self, _slave: u8, _address: u16, _values: &[u16]) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn write_coil(&mut self, _slave: u8, _address: u16, _value: bool) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn close(&mut self) {}
}

struct CountingConnector {
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl ModbusConnector for CountingConnector {
    async fn connect(&self, _config: &ModbusClientConfig) -> Result<Box<dyn ModbusTransport>, ProtocolError> {
        Ok(Box::new(CountingTransport {
            reads: self.reads.clone(),
        }))
    }
}

struct Setup {
    engine: Arc<RuleEngine>,
    store: Arc<InterCache<String>>,
    reads: Arc<AtomicUsize>,
}

fn setup() -> Setup {
    let ctx = DriverContext {
        cache: Arc::new(PointCache::new()),
        ingress: Arc::new(MessageQueue::new(1024)),
        broker: Arc::new(EventBroker::new(2, 64)),
        points: Arc::new(InMemoryPointStore::new()),
        settings: DriverSettings {
            device_max_failures: 3,
            serial_timeout: Duration::from_millis(500),
            tcp_timeout: Duration::from_millis(500),
        },
    };
    let store = Arc::new(InterCache::new());
    let engine = RuleEngine::new(ctx, store.clone());

    let reads = Arc::new(AtomicUsize::new(0));
    let connector: Arc<dyn ModbusConnector> = Arc::new(CountingConnector { reads: reads.clone() });
    let device_ctx = engine.context().clone();
    engine
        .devices()
        .register_factory(GENERIC_MODBUS_MASTER, move |_, _| {
            Ok(Arc::new(ModbusMaster::with_connector(device_ctx.clone(), connector.clone())) as Arc<dyn Resource>)
        });
    engine.start();
    Setup { engine, store, reads }
}

fn temperature_point(device: &str, frequency_ms: u64) -> DataPoint {
    DataPoint {
        uuid: "P1".to_string(),
        device_uuid: device.to_string(),
        tag: "temp".to_string(),
        alias: "温度".to_string(),
        address: PointAddress::Modbus {
            function: 3,
            slave_id: 1,
            register: 0,
            quantity: 1,
        },
        data_type: DataType::Int16,
        data_order: DataOrder::Ab,
        weight: 0.1,
        frequency_ms,
    }
}

fn modbus_device(uuid: &str) -> ResourceWorker {
    ResourceWorker::new(uuid, "plc", GENERIC_MODBUS_MASTER, json!({ "mode": "TCP", "host": "127.0.0.1" }))
}

fn mqtt_target(uuid: &str) -> ResourceWorker {
    ResourceWorker::new(uuid, "uplink", "MQTT", json!({ "host": "127.0.0.1", "port": 1, "topic": "edge/out" }))
}

fn internal_source(uuid: &str) -> ResourceWorker {
    ResourceWorker::new(uuid, "events", "INTERNAL_EVENT", json!({ "topics": ["event.#"] }))
}

fn rule(uuid: &str, source: Option<&str>, device: Option<&str>, targets: &[&str], actions: &str) -> Rule {
    Rule {
        uuid: uuid.to_string(),
        name: uuid.to_string(),
        source: source.map(str::to_string),
        device: device.map(str::to_string),
        targets: targets.iter().map(|t| t.to_string()).collect(),
        success: String::new(),
        actions: actions.to_string(),
        failed: String::new(),
        description: String::new(),
    }
}

fn submitted(engine: &RuleEngine, target: &str) -> u64 {
    engine
        .targets()
        .get_resource(target)
        .map(|t| t.details()["submitted"].as_u64().unwrap_or(0))
        .unwrap_or(0)
}

async fn wait_until(within: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rule_forwards_device_records_to_mqtt_target() {
    let s = setup();
    s.engine.context().points.upsert_point(temperature_point("D1", 100)).await.unwrap();
    s.engine.load_out_end(mqtt_target("T1")).await.unwrap();
    s.engine.load_device(modbus_device("D1")).await.unwrap();
    s.engine
        .load_rule(rule("R1", None, Some("D1"), &["T1"], "function Action(x) return x end"))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(wait_until(Duration::from_secs(1), || submitted(&s.engine, "T1") >= 5).await);

    let cached = point_value(&s.engine.context().cache, "D1", "P1").unwrap();
    let value: f64 = cached.value.parse().unwrap();
    assert!((value - 12.3).abs() < 1e-5);
    s.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleting_running_device_stops_polling_and_purges_state() {
    let s = setup();
    s.engine.context().points.upsert_point(temperature_point("D1", 50)).await.unwrap();
    s.engine.load_device(modbus_device("D1")).await.unwrap();
    s.engine
        .load_rule(rule("R5", None, Some("D1"), &[], "function Action(x) return nil end"))
        .unwrap();
    assert_eq!(s.engine.get_device("D1").unwrap().1, ResourceState::Up);
    assert!(wait_until(Duration::from_secs(1), || s.reads.load(Ordering::SeqCst) > 0).await);

    let started = tokio::time::Instant::now();
    s.engine.delete_resource(ResourceClass::Device, "D1").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    let after_delete = s.reads.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(s.reads.load(Ordering::SeqCst), after_delete);

    assert_eq!(s.engine.context().cache.size("D1"), 0);
    assert!(s.engine.context().points.list_points("D1").await.unwrap().is_empty());
    assert_eq!(s.engine.get_device("D1").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(s.engine.get_rule("R5").unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn internal_event_reaches_rule_exactly_once() {
    let s = setup();
    s.engine.load_in_end(internal_source("E1")).await.unwrap();
    let actions = r#"
function Action(x)
  local e = json.decode(x)
  local n = tonumber(store.get("hits") or "0") + 1
  store.set("hits", tostring(n))
  store.set("topic", e.topic)
  return nil
end
"#;
    s.engine.load_rule(rule("R6", Some("E1"), None, &[], actions)).unwrap();

    let event = EventRecord::resource_down(ResourceClass::Device, "D1", "timeout");
    assert_eq!(s.engine.context().broker.publish("event.device.down.D1", event), 1);

    let store = s.store.clone();
    assert!(wait_until(Duration::from_secs(1), || store.get(STORE_NAMESPACE, "hits").is_some()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(s.store.get(STORE_NAMESPACE, "hits").as_deref(), Some("1"));
    assert_eq!(
        s.store.get(STORE_NAMESPACE, "topic").as_deref(),
        Some("event.device.down.D1")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_injection_never_reaches_target() {
    let s = setup();
    s.engine.load_out_end(mqtt_target("T1")).await.unwrap();
    s.engine.load_in_end(internal_source("E1")).await.unwrap();
    let actions = r#"
function Action(x)
  store.set("last", x)
  data:ToMqtt("T1", x)
  return x
end
"#;
    s.engine.load_rule(rule("R2", Some("E1"), None, &["T1"], actions)).unwrap();

    s.engine.test_inject("E1", "hello").unwrap();
    let store = s.store.clone();
    assert!(wait_until(Duration::from_secs(1), || store.get(STORE_NAMESPACE, "last").is_some()).await);
    assert_eq!(s.store.get(STORE_NAMESPACE, "last").as_deref(), Some("hello"));
    assert_eq!(submitted(&s.engine, "T1"), 0);

    s.engine.context().emit(Origin::Source("E1".to_string()), "world");
    assert!(wait_until(Duration::from_secs(1), || submitted(&s.engine, "T1") == 2).await);
    assert_eq!(s.store.get(STORE_NAMESPACE, "last").as_deref(), Some("world"));

    assert_eq!(s.engine.test_inject("nope", "x").unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn internal_event_source_is_singleton() {
    let s = setup();
    s.engine.load_in_end(internal_source("E1")).await.unwrap();
    let err = s.engine.load_in_end(internal_source("E2")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceBusy);
    assert!(s.engine.get_in_end("E2").is_err());

    s.engine
        .update_resource(ResourceClass::Source, internal_source("E1"))
        .await
        .unwrap();
    assert_eq!(s.engine.get_in_end("E1").unwrap().1, ResourceState::Up);

    let unknown = ResourceWorker::new("X1", "x", "NO_SUCH_SOURCE", json!({}));
    assert_eq!(s.engine.load_in_end(unknown).await.unwrap_err().kind(), ErrorKind::Unsupported);
}

#[tokio::test]
async fn rule_binding_and_script_are_validated() {
    let s = setup();
    let missing = rule("R1", None, Some("D404"), &[], "function Action(x) return x end");
    assert_eq!(s.engine.load_rule(missing).unwrap_err().kind(), ErrorKind::NotFound);

    s.engine.load_in_end(internal_source("E1")).await.unwrap();
    let unbound = rule("R1", None, None, &[], "function Action(x) return x end");
    assert_eq!(s.engine.load_rule(unbound).unwrap_err().kind(), ErrorKind::BadConfig);

    s.engine
        .load_rule(rule("R1", Some("E1"), None, &[], "function Action(x) return x end"))
        .unwrap();
    let broken = rule("R1", Some("E1"), None, &[], "function Action(x) return x");
    assert_eq!(s.engine.load_rule(broken).unwrap_err().kind(), ErrorKind::ScriptFailure);
    assert_eq!(s.engine.get_rule("R1").unwrap().actions, "function Action(x) return x end");

    s.engine.remove_rule("R1").unwrap();
    assert_eq!(s.engine.remove_rule("R1").unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn point_changes_restart_device() {
    let s = setup();
    s.engine.load_device(modbus_device("D1")).await.unwrap();
    assert_eq!(
        s.engine.upsert_point(temperature_point("D404", 100)).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let mut bad = temperature_point("D1", 100);
    bad.tag = "1bad".to_string();
    assert_eq!(s.engine.upsert_point(bad).await.unwrap_err().kind(), ErrorKind::BadConfig);

    let fast = temperature_point("D1", 10);
    let saved = s.engine.upsert_point(fast).await.unwrap();
    assert_eq!(saved.frequency_ms, 50);
    assert!(wait_until(Duration::from_secs(1), || s.reads.load(Ordering::SeqCst) > 0).await);

    assert_eq!(s.engine.delete_points("D1", &["P1".to_string()]).await.unwrap(), 1);
    assert!(point_value(&s.engine.context().cache, "D1", "P1").is_none());
    assert!(s.engine.points("D1").await.unwrap().is_empty());
    s.engine.shutdown().await;
}

#[tokio::test]
async fn gateway_api_wraps_results_in_envelope() {
    let s = setup();
    let api = GatewayApi::new(s.engine.clone());

    let missing = api.get_resource(ResourceClass::Device, "D404");
    assert_eq!(missing.code, 4004);
    assert!(missing.data.is_none());

    let created = api
        .create_resource(
            ResourceClass::Source,
            ResourceRequest {
                uuid: None,
                name: "events".to_string(),
                type_tag: "INTERNAL_EVENT".to_string(),
                config: json!({}),
                description: String::new(),
            },
        )
        .await;
    assert!(created.is_success());
    let source = created.data.unwrap();
    assert_eq!(source.state, ResourceState::Up);
    assert_eq!(source.uuid.len(), 36);

    let page = api.list_resources(ResourceClass::Source, PageQuery { current: 1, size: 10 });
    assert_eq!(page.data.unwrap().total, 1);

    let rule = api.create_rule(RuleRequest {
        uuid: Some("R1".to_string()),
        name: "echo".to_string(),
        source: Some(source.uuid.clone()),
        device: None,
        targets: vec![],
        success: String::new(),
        actions: "function Action(x) return x end".to_string(),
        failed: String::new(),
        description: String::new(),
    });
    assert!(rule.is_success());
    assert_eq!(api.list_rules().data.unwrap().len(), 1);

    let injected = api.test_inject(TestInjectRequest {
        uuid: source.uuid.clone(),
        data: "ping".to_string(),
    });
    assert!(injected.is_success());

    let unknown = api
        .create_resource(
            ResourceClass::Source,
            ResourceRequest {
                uuid: None,
                name: "x".to_string(),
                type_tag: "NO_SUCH_SOURCE".to_string(),
                config: json!({}),
                description: String::new(),
            },
        )
        .await;
    assert_eq!(unknown.code, 4005);

    let deleted = api.delete_resource(ResourceClass::Source, &source.uuid).await;
    assert!(deleted.is_success());
    assert_eq!(api.get_rule("R1").code, 4004);
}

#[tokio::test]
async fn null_resource_config_is_rejected() {
    let s = setup();
    let api = GatewayApi::new(s.engine.clone());

    let rejected = api
        .create_resource(
            ResourceClass::Source,
            ResourceRequest {
                uuid: Some("E1".to_string()),
                name: "events".to_string(),
                type_tag: "INTERNAL_EVENT".to_string(),
                config: serde_json::Value::Null,
                description: String::new(),
            },
        )
        .await;
    assert_eq!(rejected.code, 4001);
    assert!(!rejected.is_success());
    assert_eq!(api.get_resource(ResourceClass::Source, "E1").code, 4004);

    let not_object = api
        .create_resource(
            ResourceClass::Source,
            ResourceRequest {
                uuid: Some("E1".to_string()),
                name: "events".to_string(),
                type_tag: "INTERNAL_EVENT".to_string(),
                config: json!([1, 2]),
                description: String::new(),
            },
        )
        .await;
    assert_eq!(not_object.code, 4001);
}
