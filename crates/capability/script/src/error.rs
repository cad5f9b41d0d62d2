use domain::ErrorKind;

/// 脚本错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    /// 语法错误或加载时执行失败
    #[error("script compile error: {0}")]
    Compile(String),

    #[error("script must define function Action")]
    MissingAction,

    #[error("script not found: {0}")]
    NotFound(String),

    /// 同一 VM 正在执行
    #[error("script busy: {0}")]
    Busy(String),

    #[error("script runtime error: {0}")]
    Runtime(String),
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Busy(_) => ErrorKind::ResourceBusy,
            Self::Compile(_) | Self::MissingAction | Self::Runtime(_) => ErrorKind::ScriptFailure,
        }
    }
}
