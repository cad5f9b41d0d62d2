use crate::error::ResourceError;
use async_trait::async_trait;
use domain::ResourceState;
use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

/// 资源驱动契约。
///
/// 实例由工厂创建后先 `init`，再 `start`；`stop` 必须幂等并释放全部 I/O 句柄。
/// 重载时同一实例会被再次 `init` + `start`。
#[async_trait]
pub trait Resource: Send + Sync {
    /// 校验并保存配置。
    async fn init(&self, uuid: &str, config: &Value) -> Result<(), ResourceError>;

    /// 启动后台任务；`cancel` 触发时任务必须退出。
    async fn start(&self, cancel: CancellationToken) -> Result<(), ResourceError>;

    fn status(&self) -> ResourceState;

    async fn stop(&self);

    async fn on_read(&self, cmd: &str) -> Result<Vec<u8>, ResourceError> {
        Err(ResourceError::Unsupported(format!("read: {}", cmd)))
    }

    async fn on_write(&self, cmd: &str, _data: &[u8]) -> Result<usize, ResourceError> {
        Err(ResourceError::Unsupported(format!("write: {}", cmd)))
    }

    async fn on_ctrl(&self, cmd: &str, _args: &Value) -> Result<Value, ResourceError> {
        Err(ResourceError::Unsupported(format!("ctrl: {}", cmd)))
    }

    /// 驱动自述信息（连接地址、统计等）
    fn details(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    /// 北向目标：非阻塞地把一条数据放入发布队列。
    fn to(&self, _payload: String) -> Result<(), ResourceError> {
        Err(ResourceError::Unsupported("to".to_string()))
    }
}

/// 驱动内部使用的原子状态
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ResourceState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn get(&self) -> ResourceState {
        ResourceState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ResourceState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ResourceState::Pending)
    }
}
