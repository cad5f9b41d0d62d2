use domain::ErrorKind;
use edge_bus::BusError;
use edge_resource::ResourceError;
use edge_script::ScriptError;
use edge_storage::StorageError;

/// 规则引擎与胶水接口错误
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("bad request: {0}")]
    BadConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// 单例资源已存在
    #[error("busy: {0}")]
    Busy(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resource(e) => e.kind(),
            Self::Script(e) => e.kind(),
            Self::Storage(e) => e.kind(),
            Self::Bus(e) => e.kind(),
            Self::BadConfig(_) => ErrorKind::BadConfig,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Busy(_) => ErrorKind::ResourceBusy,
        }
    }
}
