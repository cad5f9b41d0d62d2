//! 追踪初始化与进程级计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ingress_published: u64,
    pub ingress_dropped: u64,
    pub broker_published: u64,
    pub broker_delivered: u64,
    pub broker_dropped: u64,
    pub rule_executions: u64,
    pub rule_failures: u64,
    pub script_busy: u64,
    pub resource_reloads: u64,
    pub resource_reload_failures: u64,
    pub target_submitted: u64,
    pub target_dropped: u64,
    pub decode_errors: u64,
    pub poll_errors: u64,
}

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 网关计数指标。
#[derive(Default)]
pub struct TelemetryMetrics {
    ingress_published: AtomicU64,
    ingress_dropped: AtomicU64,
    broker_published: AtomicU64,
    broker_delivered: AtomicU64,
    broker_dropped: AtomicU64,
    rule_executions: AtomicU64,
    rule_failures: AtomicU64,
    script_busy: AtomicU64,
    resource_reloads: AtomicU64,
    resource_reload_failures: AtomicU64,
    target_submitted: AtomicU64,
    target_dropped: AtomicU64,
    decode_errors: AtomicU64,
    poll_errors: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ingress_published: self.ingress_published.load(Ordering::Relaxed),
            ingress_dropped: self.ingress_dropped.load(Ordering::Relaxed),
            broker_published: self.broker_published.load(Ordering::Relaxed),
            broker_delivered: self.broker_delivered.load(Ordering::Relaxed),
            broker_dropped: self.broker_dropped.load(Ordering::Relaxed),
            rule_executions: self.rule_executions.load(Ordering::Relaxed),
            rule_failures: self.rule_failures.load(Ordering::Relaxed),
            script_busy: self.script_busy.load(Ordering::Relaxed),
            resource_reloads: self.resource_reloads.load(Ordering::Relaxed),
            resource_reload_failures: self.resource_reload_failures.load(Ordering::Relaxed),
            target_submitted: self.target_submitted.load(Ordering::Relaxed),
            target_dropped: self.target_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info，`RUST_LOG` 可覆盖）；重复调用无副作用。
pub fn init_tracing(json: bool) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let result = if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .try_init()
        };
        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录规则引擎入口成功入队次数。
pub fn record_ingress_published() {
    metrics().ingress_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录规则引擎入口队列满导致的丢弃。
pub fn record_ingress_dropped() {
    metrics().ingress_dropped.fetch_add(1, Ordering::Relaxed);
}

pub fn record_broker_published() {
    metrics().broker_published.fetch_add(1, Ordering::Relaxed);
}

pub fn record_broker_delivered() {
    metrics().broker_delivered.fetch_add(1, Ordering::Relaxed);
}

/// 记录事件总线 worker 队列满导致的丢弃。
pub fn record_broker_dropped() {
    metrics().broker_dropped.fetch_add(1, Ordering::Relaxed);
}

pub fn record_rule_execution() {
    metrics().rule_executions.fetch_add(1, Ordering::Relaxed);
}

pub fn record_rule_failure() {
    metrics().rule_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录脚本重入被拒绝的次数。
pub fn record_script_busy() {
    metrics().script_busy.fetch_add(1, Ordering::Relaxed);
}

pub fn record_resource_reload() {
    metrics().resource_reloads.fetch_add(1, Ordering::Relaxed);
}

pub fn record_resource_reload_failure() {
    metrics()
        .resource_reload_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录提交到北向目标发布队列的次数。
pub fn record_target_submitted() {
    metrics().target_submitted.fetch_add(1, Ordering::Relaxed);
}

pub fn record_target_dropped() {
    metrics().target_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录分帧 / 寄存器 / 表达式解码失败次数。
pub fn record_decode_error() {
    metrics().decode_errors.fetch_add(1, Ordering::Relaxed);
}

pub fn record_poll_error() {
    metrics().poll_errors.fetch_add(1, Ordering::Relaxed);
}
