#![allow(dead_code)]

use domain::{INGRESS_TOPIC, InboundRecord};
use edge_bus::{EventBroker, MessageQueue};
use edge_cache::PointCache;
use edge_driver::{DriverContext, DriverSettings};
use edge_storage::{InMemoryPointStore, PointStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct Harness {
    pub ctx: DriverContext,
    pub records: Arc<Mutex<Vec<InboundRecord>>>,
}

pub fn harness() -> Harness {
    let cache = Arc::new(PointCache::default());
    let ingress = Arc::new(MessageQueue::new(1024));
    let broker = Arc::new(EventBroker::new(2, 64));
    let points: Arc<dyn PointStore> = Arc::new(InMemoryPointStore::new());
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = records.clone();
    ingress.subscribe(INGRESS_TOPIC, move |record: InboundRecord| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(record);
        }
    });
    Harness {
        ctx: DriverContext {
            cache,
            ingress,
            broker,
            points,
            settings: DriverSettings {
                device_max_failures: 3,
                serial_timeout: Duration::from_millis(500),
                tcp_timeout: Duration::from_millis(500),
            },
        },
        records,
    }
}

impl Harness {
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| serde_json::from_str(&r.payload).unwrap())
            .collect()
    }

    /// 等待至少 `n` 条记录
    pub async fn wait_records(&self, n: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.records.lock().unwrap().len() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.records.lock().unwrap().len() >= n
    }
}
