use domain::ErrorKind;

/// 资源生命周期与驱动错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    #[error("bad config: {0}")]
    BadConfig(String),

    /// UUID 已存在或资源正忙
    #[error("resource busy: {0}")]
    Busy(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    /// 未注册的类型标签或驱动不支持的操作
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadConfig(_) => ErrorKind::BadConfig,
            Self::Busy(_) => ErrorKind::ResourceBusy,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Transport(_) => ErrorKind::TransportFailure,
            Self::Decode(_) => ErrorKind::DecodeError,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 反序列化驱动配置失败
    pub fn bad_config(err: impl std::fmt::Display) -> Self {
        Self::BadConfig(err.to_string())
    }
}
