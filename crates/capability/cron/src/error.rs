use domain::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    /// 表达式或任务字段非法
    #[error("invalid task: {0}")]
    BadConfig(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CronError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadConfig(_) => ErrorKind::BadConfig,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Scheduler(_) => ErrorKind::Internal,
            Self::Io(_) => ErrorKind::TransportFailure,
        }
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for CronError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}
