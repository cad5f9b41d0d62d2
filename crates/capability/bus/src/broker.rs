use domain::EventRecord;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const WILDCARD: &str = "#";

/// 订阅回调：`(topic, payload)`，在 worker 任务中串行调用，不应阻塞。
pub type EventCallback = Arc<dyn Fn(&str, &EventRecord) + Send + Sync>;

#[derive(Clone)]
pub struct Subscriber {
    pub uuid: String,
    pub callback: EventCallback,
}

impl Subscriber {
    pub fn new<F>(uuid: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&str, &EventRecord) + Send + Sync + 'static,
    {
        Self {
            uuid: uuid.into(),
            callback: Arc::new(callback),
        }
    }
}

#[derive(Default)]
struct TopicNode {
    children: HashMap<String, TopicNode>,
    subscribers: HashMap<String, EventCallback>,
}

impl TopicNode {
    fn remove_everywhere(&mut self, uuid: &str) -> usize {
        let mut removed = usize::from(self.subscribers.remove(uuid).is_some());
        for child in self.children.values_mut() {
            removed += child.remove_everywhere(uuid);
        }
        self.children
            .retain(|_, child| !child.subscribers.is_empty() || !child.children.is_empty());
        removed
    }

    fn collect(&self, out: &mut HashMap<String, EventCallback>) {
        for (uuid, callback) in &self.subscribers {
            out.entry(uuid.clone()).or_insert_with(|| Arc::clone(callback));
        }
    }
}

struct Delivery {
    callback: EventCallback,
    topic: Arc<str>,
    payload: Arc<EventRecord>,
}

/// 层级主题事件总线
pub struct EventBroker {
    root: RwLock<TopicNode>,
    workers: RwLock<Vec<mpsc::Sender<Delivery>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    published: AtomicU64,
    delivered: Arc<AtomicU64>,
    dropped: AtomicU64,
}

impl EventBroker {
    /// 创建总线并启动 `workers` 个投递任务，每个队列容量 `queue_size`。
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let delivered = Arc::new(AtomicU64::new(0));
        let mut senders = Vec::new();
        let mut handles = Vec::new();
        for index in 0..workers.max(1) {
            let (tx, mut rx) = mpsc::channel::<Delivery>(queue_size.max(1));
            let delivered = Arc::clone(&delivered);
            handles.push(tokio::spawn(async move {
                while let Some(delivery) = rx.recv().await {
                    (delivery.callback)(&delivery.topic, &delivery.payload);
                    delivered.fetch_add(1, Ordering::Relaxed);
                    edge_telemetry::record_broker_delivered();
                }
                debug!(target: "edge.broker", worker = index, "broker worker exited");
            }));
            senders.push(tx);
        }
        Self {
            root: RwLock::new(TopicNode::default()),
            workers: RwLock::new(senders),
            handles: Mutex::new(handles),
            published: AtomicU64::new(0),
            delivered,
            dropped: AtomicU64::new(0),
        }
    }

    /// 订阅；同一主题下按 UUID 幂等。
    pub fn subscribe(&self, topic: &str, subscriber: Subscriber) {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        let mut node = &mut *root;
        for segment in topic.split('.') {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.subscribers.insert(subscriber.uuid.clone(), subscriber.callback);
        debug!(target: "edge.broker", topic = %topic, uuid = %subscriber.uuid, "subscribed");
    }

    /// 从所有主题移除该订阅者。
    pub fn unsubscribe(&self, uuid: &str) -> usize {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        root.remove_everywhere(uuid)
    }

    pub fn unsubscribe_from_topic(&self, topic: &str, uuid: &str) -> bool {
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        let mut node = &mut *root;
        for segment in topic.split('.') {
            match node.children.get_mut(segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.subscribers.remove(uuid).is_some()
    }

    fn matching(&self, topic: &str) -> HashMap<String, EventCallback> {
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        let mut out = HashMap::new();
        let mut node = Some(&*root);
        for segment in topic.split('.') {
            let Some(current) = node else {
                break;
            };
            if let Some(wildcard) = current.children.get(WILDCARD) {
                wildcard.collect(&mut out);
            }
            node = current.children.get(segment);
        }
        if let Some(current) = node {
            current.collect(&mut out);
            if let Some(wildcard) = current.children.get(WILDCARD) {
                wildcard.collect(&mut out);
            }
        }
        out
    }

    /// 发布事件，返回实际入队的投递数；队列满的投递被丢弃并计数。
    pub fn publish(&self, topic: &str, payload: EventRecord) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        edge_telemetry::record_broker_published();
        let targets = self.matching(topic);
        if targets.is_empty() {
            return 0;
        }
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        if workers.is_empty() {
            return 0;
        }
        let topic: Arc<str> = Arc::from(topic);
        let payload = Arc::new(payload);
        let mut enqueued = 0;
        for (uuid, callback) in targets {
            let worker = &workers[worker_index(&uuid, workers.len())];
            let delivery = Delivery {
                callback,
                topic: Arc::clone(&topic),
                payload: Arc::clone(&payload),
            };
            match worker.try_send(delivery) {
                Ok(()) => enqueued += 1,
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    edge_telemetry::record_broker_dropped();
                    warn!(target: "edge.broker", topic = %topic, uuid = %uuid, "broker queue full, event dropped");
                }
            }
        }
        enqueued
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 停止接收新事件，等待 worker 排空已入队的投递后退出。
    pub async fn close(&self) {
        self.workers.write().unwrap_or_else(|e| e.into_inner()).clear();
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!(target: "edge.broker", "event broker closed");
    }
}

fn worker_index(uuid: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    uuid.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}
