//! 边缘网关进程入口：装配运行时核心并挂载管理 API。

mod handlers;
mod routes;
mod utils;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use domain::InboundRecord;
use edge_bus::{EventBroker, MessageQueue};
use edge_cache::{InterCache, PointCache};
use edge_config::{AppConfig, LogFormat};
use edge_cron::CronManager;
use edge_driver::{DriverContext, DriverSettings};
use edge_engine::{GatewayApi, RuleEngine};
use edge_resource::{Supervisor, SupervisorConfig};
use edge_storage::{InMemoryPointStore, PointStore};
use edge_telemetry::{init_tracing, new_request_ids};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub api: GatewayApi,
    pub cron: Arc<CronManager>,
}

/// 运行时核心：引擎、总线与后台任务句柄
struct Runtime {
    engine: Arc<RuleEngine>,
    broker: Arc<EventBroker>,
    ingress: Arc<MessageQueue<InboundRecord>>,
    background: Vec<JoinHandle<()>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing(config.log_format == LogFormat::Json);

    let cancel = CancellationToken::new();
    let runtime = build_runtime(&config, cancel.clone());

    let cron = Arc::new(CronManager::new(&config.cron_log_dir).await?);
    cron.start().await?;

    let state = AppState {
        api: GatewayApi::new(Arc::clone(&runtime.engine)),
        cron: Arc::clone(&cron),
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(target: "edge.gateway", addr = %config.http_addr, "management api listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Err(e) = cron.stop().await {
        warn!(target: "edge.gateway", error = %e, "cron stop failed");
    }
    runtime.shutdown().await;
    info!(target: "edge.gateway", "gateway stopped");
    Ok(())
}

fn build_runtime(config: &AppConfig, cancel: CancellationToken) -> Runtime {
    let cache = Arc::new(PointCache::new());
    let store = Arc::new(InterCache::<String>::new());
    let broker = Arc::new(EventBroker::new(config.broker_workers, config.broker_queue_size));
    let ingress = Arc::new(MessageQueue::new(config.ingress_queue_size));
    let points: Arc<dyn PointStore> = Arc::new(InMemoryPointStore::new());

    let mut background = vec![
        cache.spawn_sweeper(config.cache_sweep_interval(), cancel.clone()),
        store.spawn_sweeper(config.cache_sweep_interval(), cancel.clone()),
    ];

    let ctx = DriverContext {
        cache: Arc::clone(&cache),
        ingress: Arc::clone(&ingress),
        broker: Arc::clone(&broker),
        points,
        settings: DriverSettings {
            device_max_failures: config.device_max_failures,
            serial_timeout: Duration::from_millis(config.serial_timeout_ms),
            tcp_timeout: Duration::from_millis(config.tcp_timeout_ms),
        },
    };
    let engine = RuleEngine::new(ctx, store);
    engine.start();

    let supervisor_config = SupervisorConfig {
        interval: config.supervisor_interval(),
        max_retries: config.supervisor_max_retries,
        backoff: config.supervisor_backoff(),
    };
    for manager in [
        engine.sources(),
        engine.targets(),
        engine.devices(),
        engine.plugins(),
    ] {
        let supervisor = Supervisor::new(Arc::clone(manager), supervisor_config)
            .with_events(Arc::clone(&broker), Arc::clone(&cache));
        background.push(Arc::new(supervisor).spawn(cancel.clone()));
    }

    Runtime {
        engine,
        broker,
        ingress,
        background,
    }
}

impl Runtime {
    /// 先停资源，再关闭入口队列与事件总线，最后等待后台任务退出。
    async fn shutdown(self) {
        self.engine.shutdown().await;
        self.ingress.destroy().await;
        self.broker.close().await;
        for handle in self.background {
            if let Err(e) = handle.await {
                warn!(target: "edge.gateway", error = %e, "background task join failed");
            }
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(target: "edge.gateway", error = %e, "ctrl-c handler failed");
            }
            info!(target: "edge.gateway", "shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }
}

/// 生成 request_id 与 trace_id，注入请求扩展、日志 span 与响应头。
async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// 测试用运行时：默认配置，cron 日志写入临时目录。
    pub async fn state(dir: &std::path::Path) -> AppState {
        let config = AppConfig::default();
        let runtime = build_runtime(&config, CancellationToken::new());
        let cron = Arc::new(CronManager::new(dir).await.unwrap());
        AppState {
            api: GatewayApi::new(runtime.engine),
            cron,
        }
    }
}
