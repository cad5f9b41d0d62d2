use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// 资源后台任务：一个取消令牌 + 若干任务句柄。
#[derive(Default)]
pub(crate) struct TaskSlot {
    inner: Mutex<Option<(CancellationToken, Vec<JoinHandle<()>>)>>,
}

impl TaskSlot {
    /// 取消上一轮任务并派生新的令牌。
    pub fn begin(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        let previous = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace((token.clone(), Vec::new()));
        if let Some((old, handles)) = previous {
            old.cancel();
            for handle in handles {
                handle.abort();
            }
        }
        token
    }

    pub fn attach(&self, handle: JoinHandle<()>) {
        match self.inner.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            Some((_, handles)) => handles.push(handle),
            None => handle.abort(),
        }
    }

    /// 取消并等待任务退出，超时则强制中止。
    pub async fn stop(&self) {
        let taken = self.inner.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some((token, handles)) = taken else {
            return;
        };
        token.cancel();
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                warn!(target: "edge.driver", "task did not exit in time, aborted");
                abort.abort();
            }
        }
    }
}
