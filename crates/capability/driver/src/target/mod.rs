mod http;
mod mqtt_target;
mod tdengine;
mod uart;

pub use http::HttpTarget;
pub use mqtt_target::MqttTarget;
pub use tdengine::TdengineTarget;
pub use uart::UartTarget;

use edge_resource::ResourceError;
use serde_json::{Value, json};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub(crate) fn default_queue_size() -> usize {
    1024
}

/// 北向目标的有界发布队列。
///
/// `to()` 只做非阻塞入队；队列满时丢弃并计数，由后台任务负责真正发送。
#[derive(Default)]
pub(crate) struct Outbox {
    sender: RwLock<Option<mpsc::Sender<String>>>,
    submitted: AtomicU64,
    dropped: AtomicU64,
}

impl Outbox {
    /// 新建队列，替换旧的发送端。
    pub fn open(&self, capacity: usize) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.sender.write().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    pub fn close(&self) {
        self.sender.write().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn submit(&self, payload: String) -> Result<(), ResourceError> {
        let sender = self
            .sender
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ResourceError::Transport("target is not running".to_string()))?;
        match sender.try_send(payload) {
            Ok(()) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                edge_telemetry::record_target_submitted();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                edge_telemetry::record_target_dropped();
                Err(ResourceError::Busy("publish queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(ResourceError::Transport("publish queue closed".to_string()))
            }
        }
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Value {
        json!({
            "submitted": self.submitted(),
            "dropped": self.dropped.load(Ordering::Relaxed),
        })
    }
}

/// 合并驱动自述与队列统计
pub(crate) fn with_stats(mut details: Value, outbox: &Outbox) -> Value {
    if let (Value::Object(fields), Value::Object(stats)) = (&mut details, outbox.stats()) {
        fields.extend(stats);
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbox_counts_and_drops() {
        let outbox = Outbox::default();
        assert!(outbox.submit("x".to_string()).is_err());

        let mut rx = outbox.open(2);
        outbox.submit("a".to_string()).unwrap();
        outbox.submit("b".to_string()).unwrap();
        let err = outbox.submit("c".to_string()).unwrap_err();
        assert!(matches!(err, ResourceError::Busy(_)));
        assert_eq!(outbox.submitted(), 2);
        assert_eq!(outbox.stats()["dropped"], 1);
        assert_eq!(rx.recv().await.as_deref(), Some("a"));

        outbox.close();
        assert!(outbox.submit("d".to_string()).is_err());
    }
}
