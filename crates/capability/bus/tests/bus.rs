use domain::EventRecord;
use edge_bus::{BusError, EventBroker, MessageQueue, Subscriber};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn record(topic: &str) -> EventRecord {
    EventRecord::new(topic, "test", "DEVICE", "down", serde_json::json!({}))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn wildcard_subscriber_receives_subtree() {
    let broker = EventBroker::new(4, 64);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    broker.subscribe(
        "sensors.#",
        Subscriber::new("S", move |topic, _| sink.lock().unwrap().push(topic.to_string())),
    );

    broker.publish("sensors.temp.r1", record("sensors.temp.r1"));
    broker.publish("sensors.humidity.r1", record("sensors.humidity.r1"));
    broker.publish("devices.temp.r1", record("devices.temp.r1"));
    settle().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["sensors.temp.r1".to_string(), "sensors.humidity.r1".to_string()]
    );

    broker.unsubscribe("S");
    broker.publish("sensors.temp.r2", record("sensors.temp.r2"));
    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn device_down_event_is_delivered_once() {
    let broker = EventBroker::new(2, 16);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    broker.subscribe(
        "event.device.down.D1",
        Subscriber::new("watcher", move |topic, _| sink.lock().unwrap().push(topic.to_string())),
    );
    // 同一订阅者经多个模式匹配时也只投递一次
    let sink = Arc::clone(&seen);
    broker.subscribe(
        "event.#",
        Subscriber::new("watcher", move |topic, _| sink.lock().unwrap().push(topic.to_string())),
    );

    assert_eq!(broker.publish("event.device.down.D1", record("event.device.down.D1")), 1);
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec!["event.device.down.D1".to_string()]);
}

#[tokio::test]
async fn per_subscriber_order_is_preserved() {
    let broker = EventBroker::new(4, 256);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    broker.subscribe(
        "a.b",
        Subscriber::new("ordered", move |_, payload| {
            sink.lock().unwrap().push(payload.payload["n"].as_i64().unwrap_or(-1))
        }),
    );
    for n in 0..100 {
        let event = EventRecord::new("a.b", "test", "TEST", "seq", serde_json::json!({ "n": n }));
        broker.publish("a.b", event);
    }
    settle().await;
    assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<i64>>());
}

#[tokio::test]
async fn full_worker_queue_drops() {
    let broker = EventBroker::new(1, 1);
    broker.subscribe(
        "slow",
        Subscriber::new("slow", |_, _| std::thread::sleep(Duration::from_millis(20))),
    );
    for _ in 0..20 {
        broker.publish("slow", record("slow"));
    }
    assert!(broker.dropped() > 0);
    broker.close().await;
}

#[tokio::test]
async fn message_queue_is_fifo_per_topic() {
    let queue: MessageQueue<u32> = MessageQueue::new(128);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    queue.subscribe("ingress", move |n| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(n);
        }
    });
    for n in 0..50 {
        queue.publish("ingress", n).unwrap();
    }
    settle().await;
    assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<u32>>());

    queue.destroy().await;
    assert!(matches!(queue.publish("ingress", 1), Err(BusError::Closed)));
}

#[tokio::test]
async fn message_queue_drops_when_full() {
    let queue: MessageQueue<u32> = MessageQueue::new(2);
    queue.subscribe("busy", |_| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
    });
    let mut rejected = 0;
    for n in 0..10 {
        if queue.publish("busy", n).is_err() {
            rejected += 1;
        }
    }
    assert!(rejected > 0);
    assert_eq!(queue.dropped("busy"), rejected);
    assert_eq!(queue.total_dropped(), rejected);
}
