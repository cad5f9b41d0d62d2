use crate::error::CronError;
use crate::task::{CronTask, normalize_schedule, run_task};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

type LastRun = Arc<Mutex<Option<DateTime<Utc>>>>;

struct Entry {
    task: CronTask,
    job: Option<Uuid>,
    last_run: LastRun,
}

/// 定时任务管理器
///
/// 任务按名称唯一；停用的任务只登记不调度。错过的触发点不补跑。
pub struct CronManager {
    scheduler: JobScheduler,
    log_dir: PathBuf,
    entries: Mutex<BTreeMap<String, Entry>>,
    started: AtomicBool,
}

impl CronManager {
    pub async fn new(log_dir: impl Into<PathBuf>) -> Result<Self, CronError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            log_dir: log_dir.into(),
            entries: Mutex::new(BTreeMap::new()),
            started: AtomicBool::new(false),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// 登记任务；同名任务会被替换。
    pub async fn add_task(&self, mut task: CronTask) -> Result<(), CronError> {
        if task.name.trim().is_empty() {
            return Err(CronError::BadConfig("task name is empty".to_string()));
        }
        if task.command.trim().is_empty() {
            return Err(CronError::BadConfig(format!(
                "task {} has no command",
                task.name
            )));
        }
        task.schedule = normalize_schedule(&task.schedule)?;
        if task.log_path.as_os_str().is_empty() {
            task.log_path = self.log_dir.join(format!("{}.log", task.name));
        }
        task.next_run = None;

        let last_run: LastRun = Arc::new(Mutex::new(task.last_run));
        let job = if task.active {
            let job = build_job(&task, Arc::clone(&last_run))?;
            Some(self.scheduler.add(job).await?)
        } else {
            None
        };

        let previous = self.lock_entries().insert(
            task.name.clone(),
            Entry {
                task: task.clone(),
                job,
                last_run,
            },
        );
        if let Some(previous) = previous
            && let Some(old_job) = previous.job
        {
            self.scheduler.remove(&old_job).await?;
        }
        info!(
            target: "edge.cron",
            task = %task.name,
            schedule = %task.schedule,
            active = task.active,
            "task registered"
        );
        Ok(())
    }

    pub async fn remove_task(&self, name: &str) -> Result<CronTask, CronError> {
        let entry = self
            .lock_entries()
            .remove(name)
            .ok_or_else(|| CronError::NotFound(name.to_string()))?;
        if let Some(job) = entry.job {
            self.scheduler.remove(&job).await?;
        }
        info!(target: "edge.cron", task = %name, "task removed");
        Ok(entry.task)
    }

    /// 开始调度；重复调用无副作用。
    pub async fn start(&self) -> Result<(), CronError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.scheduler.start().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        info!(target: "edge.cron", tasks = self.lock_entries().len(), "cron scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), CronError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        info!(target: "edge.cron", "cron scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// 任务快照，按名称排序，附带 `last_run` / `next_run`。
    pub async fn list_tasks(&self) -> Vec<CronTask> {
        let snapshot: Vec<(CronTask, Option<Uuid>, LastRun)> = self
            .lock_entries()
            .values()
            .map(|entry| (entry.task.clone(), entry.job, Arc::clone(&entry.last_run)))
            .collect();

        let mut scheduler = self.scheduler.clone();
        let mut tasks = Vec::with_capacity(snapshot.len());
        for (mut task, job, last_run) in snapshot {
            task.last_run = *last_run.lock().unwrap_or_else(|e| e.into_inner());
            task.next_run = match job {
                Some(job) => match scheduler.next_tick_for_job(job).await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(target: "edge.cron", task = %task.name, error = %e, "next tick lookup failed");
                        None
                    }
                },
                None => None,
            };
            tasks.push(task);
        }
        tasks
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn build_job(task: &CronTask, last_run: LastRun) -> Result<Job, CronError> {
    let template = task.clone();
    Job::new_async(task.schedule.as_str(), move |_job_id, _scheduler| {
        let task = template.clone();
        let last_run = Arc::clone(&last_run);
        Box::pin(async move {
            *last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
            if let Err(e) = run_task(&task).await {
                warn!(target: "edge.cron", task = %task.name, error = %e, "task run failed");
            }
        })
    })
    .map_err(|e| CronError::BadConfig(format!("schedule '{}': {}", task.schedule, e)))
}
