//! 存储层错误类型

use domain::ErrorKind;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// 点位字段校验失败
    #[error("invalid point: {0}")]
    Invalid(String),

    /// tag 在设备内重复
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid(_) => ErrorKind::BadConfig,
            Self::Conflict(_) => ErrorKind::ResourceBusy,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Backend(_) => ErrorKind::Internal,
        }
    }
}
