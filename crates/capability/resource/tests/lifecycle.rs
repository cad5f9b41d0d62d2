use async_trait::async_trait;
use domain::{ResourceClass, ResourceState, ResourceWorker};
use edge_bus::{EventBroker, Subscriber};
use edge_cache::{PointCache, record_fault};
use edge_resource::{
    Resource, ResourceError, ResourceManager, StateCell, Supervisor, SupervisorConfig,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 前 `fail_starts` 次启动失败的测试资源
struct Flaky {
    state: StateCell,
    fail_starts: AtomicU32,
    inits: AtomicU32,
    stops: AtomicU32,
}

impl Flaky {
    fn new(fail_starts: u32) -> Arc<Self> {
        Arc::new(Self {
            state: StateCell::default(),
            fail_starts: AtomicU32::new(fail_starts),
            inits: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Resource for Flaky {
    async fn init(&self, _uuid: &str, config: &Value) -> Result<(), ResourceError> {
        if config.get("invalid").is_some() {
            return Err(ResourceError::BadConfig("invalid".into()));
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.state.set(ResourceState::Pending);
        Ok(())
    }

    async fn start(&self, _cancel: CancellationToken) -> Result<(), ResourceError> {
        if self.fail_starts.load(Ordering::SeqCst) > 0 {
            self.fail_starts.fetch_sub(1, Ordering::SeqCst);
            self.state.set(ResourceState::Down);
            return Err(ResourceError::Transport("refused".into()));
        }
        self.state.set(ResourceState::Up);
        Ok(())
    }

    fn status(&self) -> ResourceState {
        self.state.get()
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.state.set(ResourceState::Stop);
    }
}

fn manager_with(instance: Arc<Flaky>) -> Arc<ResourceManager> {
    let manager = Arc::new(ResourceManager::new(ResourceClass::Device));
    manager.register_factory("FLAKY", move |_, _| Ok(instance.clone() as Arc<dyn Resource>));
    manager
}

fn worker(uuid: &str) -> ResourceWorker {
    ResourceWorker::new(uuid, uuid, "FLAKY", json!({}))
}

fn fast_config(max_retries: u32) -> SupervisorConfig {
    SupervisorConfig {
        interval: Duration::from_millis(20),
        max_retries,
        backoff: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn create_rejects_duplicates_and_bad_input() {
    let manager = manager_with(Flaky::new(0));
    manager.create_resource(worker("a")).await.unwrap();

    let dup = manager.create_resource(worker("a")).await.err().unwrap();
    assert!(matches!(dup, ResourceError::Busy(_)));

    let unknown = ResourceWorker::new("b", "b", "NOPE", json!({}));
    assert!(matches!(
        manager.create_resource(unknown).await.err().unwrap(),
        ResourceError::Unsupported(_)
    ));

    let null_config = ResourceWorker::new("c", "c", "FLAKY", Value::Null);
    assert!(matches!(
        manager.create_resource(null_config).await.err().unwrap(),
        ResourceError::BadConfig(_)
    ));

    let invalid = ResourceWorker::new("d", "d", "FLAKY", json!({"invalid": true}));
    assert!(manager.create_resource(invalid).await.is_err());
    assert!(!manager.contains("d"));
    assert_eq!(manager.len(), 1);
}

#[tokio::test]
async fn stop_removes_and_calls_stop() {
    let flaky = Flaky::new(0);
    let manager = manager_with(flaky.clone());
    manager.load_resource(worker("a")).await.unwrap();
    assert_eq!(manager.state("a"), Some(ResourceState::Up));

    manager.stop_resource("a").await.unwrap();
    assert_eq!(flaky.stops.load(Ordering::SeqCst), 1);
    assert!(manager.get_resource("a").is_none());
    assert!(matches!(
        manager.stop_resource("a").await.err().unwrap(),
        ResourceError::NotFound(_)
    ));
}

#[tokio::test]
async fn reload_is_noop_when_up() {
    let flaky = Flaky::new(0);
    let manager = manager_with(flaky.clone());
    manager.load_resource(worker("a")).await.unwrap();
    manager.reload_resource("a").await.unwrap();
    assert_eq!(flaky.inits.load(Ordering::SeqCst), 1);
    assert_eq!(flaky.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn restart_reinitializes_running_resource() {
    let flaky = Flaky::new(0);
    let manager = manager_with(flaky.clone());
    manager.load_resource(worker("a")).await.unwrap();
    manager.restart_resource("a").await.unwrap();
    assert_eq!(flaky.inits.load(Ordering::SeqCst), 2);
    assert_eq!(flaky.stops.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state("a"), Some(ResourceState::Up));
    assert!(matches!(
        manager.restart_resource("missing").await.err().unwrap(),
        ResourceError::NotFound(_)
    ));
}

#[tokio::test]
async fn paginate_clamps_window() {
    let manager = Arc::new(ResourceManager::new(ResourceClass::Source));
    manager.register_factory("FLAKY", |_, _| Ok(Flaky::new(0) as Arc<dyn Resource>));
    for uuid in ["u3", "u1", "u2"] {
        manager.create_resource(worker(uuid)).await.unwrap();
    }
    let (total, page) = manager.paginate(1, 2);
    assert_eq!(total, 3);
    let uuids: Vec<_> = page.iter().map(|(w, _)| w.uuid.as_str()).collect();
    assert_eq!(uuids, vec!["u1", "u2"]);
    assert_eq!(manager.paginate(2, 2).1.len(), 1);
    assert!(manager.paginate(5, 2).1.is_empty());
    assert!(manager.paginate(0, 0).1.is_empty());
}

#[tokio::test]
async fn supervisor_reloads_down_resource() {
    let flaky = Flaky::new(1);
    let manager = manager_with(flaky.clone());
    assert!(manager.load_resource(worker("dev1")).await.is_err());
    assert_eq!(manager.state("dev1"), Some(ResourceState::Down));

    let broker = Arc::new(EventBroker::new(1, 16));
    let faults = Arc::new(PointCache::new());
    record_fault(&faults, "dev1", "refused");
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    broker.subscribe(
        "event.device.down.#",
        Subscriber::new("watch", move |topic, event| {
            sink.lock().unwrap().push((topic.to_string(), event.payload["error"].clone()))
        }),
    );

    let supervisor = Supervisor::new(Arc::clone(&manager), fast_config(3))
        .with_events(Arc::clone(&broker), faults);
    let report = supervisor.tick().await;
    assert_eq!(report.reloaded, vec!["dev1".to_string()]);
    assert_eq!(manager.state("dev1"), Some(ResourceState::Up));
    assert_eq!(supervisor.attempts("dev1"), 0);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        *events.lock().unwrap(),
        vec![("event.device.down.dev1".to_string(), json!("refused"))]
    );
}

#[tokio::test]
async fn supervisor_gives_up_after_max_retries() {
    let flaky = Flaky::new(100);
    let manager = manager_with(flaky.clone());
    let _ = manager.load_resource(worker("dev1")).await;
    let supervisor = Supervisor::new(Arc::clone(&manager), fast_config(2));

    assert_eq!(supervisor.tick().await.failed.len(), 1);
    assert_eq!(supervisor.tick().await.failed.len(), 1);
    assert_eq!(supervisor.attempts("dev1"), 2);
    let report = supervisor.tick().await;
    assert_eq!(report.skipped, vec!["dev1".to_string()]);
    assert!(report.failed.is_empty());

    // 外部干预后恢复：计数清零
    flaky.fail_starts.store(0, Ordering::SeqCst);
    flaky.state.set(ResourceState::Up);
    manager.start_resource("dev1").await.unwrap();
    supervisor.tick().await;
    assert_eq!(supervisor.attempts("dev1"), 0);
}

#[tokio::test]
async fn supervisor_task_recovers_within_tick() {
    let flaky = Flaky::new(1);
    let manager = manager_with(flaky.clone());
    let _ = manager.load_resource(worker("dev1")).await;
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&manager), fast_config(3)));
    let cancel = CancellationToken::new();
    let handle = Arc::clone(&supervisor).spawn(cancel.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.state("dev1"), Some(ResourceState::Up));
    cancel.cancel();
    handle.await.unwrap();
}
