use domain::ErrorKind;

/// 总线错误
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("bus closed")]
    Closed,
}

impl BusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QueueFull(_) => ErrorKind::ResourceBusy,
            Self::Closed => ErrorKind::Internal,
        }
    }
}
