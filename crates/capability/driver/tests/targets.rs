mod common;

use domain::{EventRecord, ResourceState};
use edge_bus::Subscriber;
use edge_driver::{HttpTarget, MqttTarget, SystemMonitor, UartTarget};
use edge_resource::Resource;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn mqtt_target_queues_without_broker() {
    let target = MqttTarget::new();
    target
        .init("T1", &json!({ "host": "127.0.0.1", "port": 1, "topic": "edge/out" }))
        .await
        .unwrap();
    assert!(target.to("early".to_string()).is_err());

    target.start(CancellationToken::new()).await.unwrap();
    assert_eq!(target.status(), ResourceState::Up);
    for i in 0..5 {
        target.to(format!("{{\"n\":{}}}", i)).unwrap();
    }
    assert_eq!(target.submitted(), 5);
    assert_eq!(target.details()["submitted"], 5);
    assert_eq!(target.details()["topic"], "edge/out");

    target.stop().await;
    assert!(target.to("late".to_string()).is_err());
}

#[tokio::test]
async fn mqtt_target_rejects_wildcard_topic() {
    let target = MqttTarget::new();
    assert!(
        target
            .init("T2", &json!({ "host": "127.0.0.1", "topic": "edge/#" }))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn http_target_drops_when_queue_is_full() {
    let target = HttpTarget::new();
    target
        .init(
            "T3",
            &json!({ "url": "http://127.0.0.1:1/ingest", "queueSize": 1, "timeoutMs": 200 }),
        )
        .await
        .unwrap();
    target.start(CancellationToken::new()).await.unwrap();

    let mut accepted = 0;
    for _ in 0..50 {
        if target.to("{}".to_string()).is_ok() {
            accepted += 1;
        }
    }
    assert!(accepted >= 1);
    assert!(target.details()["dropped"].as_u64().unwrap() >= 1);
    target.stop().await;

    assert!(HttpTarget::new().init("T4", &json!({ "url": "ftp://x" })).await.is_err());
}

#[tokio::test]
async fn uart_target_fails_on_missing_port() {
    let h = common::harness();
    let target = UartTarget::new(h.ctx.clone());
    target
        .init("T5", &json!({ "uart": "/dev/edge-missing-tty", "baudRate": 9600 }))
        .await
        .unwrap();
    assert!(target.start(CancellationToken::new()).await.is_err());
    assert_eq!(target.status(), ResourceState::Down);
    assert!(edge_cache::last_fault(&h.ctx.cache, "T5").is_some());
}

#[tokio::test]
async fn system_monitor_publishes_load() {
    let h = common::harness();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "0.25 0.50 0.75 1/100 4242").unwrap();

    let events: Arc<Mutex<Vec<EventRecord>>> = Arc::default();
    let sink = events.clone();
    h.ctx.broker.subscribe(
        "system.cpu.load.#",
        Subscriber::new("probe", move |_topic, record| {
            sink.lock().unwrap().push(record.clone());
        }),
    );

    let plugin = SystemMonitor::new(h.ctx.clone());
    plugin
        .init(
            "M1",
            &json!({ "subsystem": "edge", "intervalMs": 100, "loadavgPath": file.path() }),
        )
        .await
        .unwrap();
    plugin.start(CancellationToken::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let events = events.lock().unwrap().clone();
    assert!(!events.is_empty());
    assert_eq!(events[0].topic, "system.cpu.load.edge");
    assert_eq!(events[0].payload["load5"], 0.5);
    assert_eq!(plugin.on_ctrl("sample", &json!({})).await.unwrap()["load15"], 0.75);

    plugin.stop().await;
}
