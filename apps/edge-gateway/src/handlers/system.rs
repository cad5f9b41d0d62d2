//! 系统 handlers
//!
//! - GET /health
//! - GET /metrics   进程计数指标
//! - GET /crons     定时任务列表（含 lastRun / nextRun）

use crate::AppState;
use crate::utils::envelope;
use api_contract::{ApiResponse, MetricsDto};
use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use edge_telemetry::metrics;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn get_metrics() -> Response {
    let snapshot = metrics().snapshot();
    envelope(ApiResponse::success(MetricsDto {
        ingress_published: snapshot.ingress_published,
        ingress_dropped: snapshot.ingress_dropped,
        broker_published: snapshot.broker_published,
        broker_delivered: snapshot.broker_delivered,
        broker_dropped: snapshot.broker_dropped,
        rule_executions: snapshot.rule_executions,
        rule_failures: snapshot.rule_failures,
        script_busy: snapshot.script_busy,
        resource_reloads: snapshot.resource_reloads,
        resource_reload_failures: snapshot.resource_reload_failures,
        target_submitted: snapshot.target_submitted,
        target_dropped: snapshot.target_dropped,
        decode_errors: snapshot.decode_errors,
        poll_errors: snapshot.poll_errors,
    }))
}

pub async fn list_crons(State(state): State<AppState>) -> Response {
    envelope(ApiResponse::success(state.cron.list_tasks().await))
}
