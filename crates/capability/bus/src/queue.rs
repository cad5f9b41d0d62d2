use crate::error::BusError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 队列消息处理函数；分发任务逐条等待其完成，保证主题内 FIFO。
pub type QueueHandler<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct TopicQueue<T> {
    sender: mpsc::Sender<T>,
    handlers: Arc<RwLock<Vec<QueueHandler<T>>>>,
    dropped: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// 按主题的有界 FIFO 队列
pub struct MessageQueue<T> {
    capacity: usize,
    topics: RwLock<HashMap<String, Arc<TopicQueue<T>>>>,
    closed: AtomicBool,
}

impl<T: Clone + Send + 'static> MessageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn topic(&self, name: &str) -> Arc<TopicQueue<T>> {
        if let Some(topic) = self
            .topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Arc::clone(topic);
        }
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let topic = topics.entry(name.to_string()).or_insert_with(|| {
            let (sender, mut receiver) = mpsc::channel::<T>(self.capacity);
            let handlers: Arc<RwLock<Vec<QueueHandler<T>>>> = Arc::new(RwLock::new(Vec::new()));
            let dispatch_handlers = Arc::clone(&handlers);
            let topic_name = name.to_string();
            let task = tokio::spawn(async move {
                while let Some(message) = receiver.recv().await {
                    let snapshot: Vec<QueueHandler<T>> = dispatch_handlers
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone();
                    for handler in snapshot {
                        handler(message.clone()).await;
                    }
                }
                debug!(target: "edge.queue", topic = %topic_name, "queue dispatcher exited");
            });
            Arc::new(TopicQueue {
                sender,
                handlers,
                dropped: AtomicU64::new(0),
                task: Mutex::new(Some(task)),
            })
        });
        Arc::clone(topic)
    }

    /// 非阻塞入队；队列满时丢弃并计数。
    pub fn publish(&self, topic: &str, message: T) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let queue = self.topic(topic);
        match queue.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                queue.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(target: "edge.queue", topic = %topic, "queue full, message dropped");
                Err(BusError::QueueFull(topic.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }

    pub fn subscribe<F, Fut>(&self, topic: &str, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: QueueHandler<T> = Arc::new(
            move |message: T| -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(handler(message)) },
        );
        self.topic(topic)
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// 移除该主题的全部订阅者。
    pub fn unsubscribe(&self, topic: &str) {
        if let Some(queue) = self
            .topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
        {
            queue.handlers.write().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    pub fn dropped(&self, topic: &str) -> u64 {
        self.topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map(|queue| queue.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total_dropped(&self) -> u64 {
        self.topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|queue| queue.dropped.load(Ordering::Relaxed))
            .sum()
    }

    /// 关闭全部主题；已入队的消息会先投递完。
    pub async fn destroy(&self) {
        self.closed.store(true, Ordering::Release);
        let topics: Vec<Arc<TopicQueue<T>>> = self
            .topics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, queue)| queue)
            .collect();
        for queue in topics {
            let task = queue.task.lock().unwrap_or_else(|e| e.into_inner()).take();
            drop(queue);
            if let Some(task) = task {
                let _ = task.await;
            }
        }
    }
}
