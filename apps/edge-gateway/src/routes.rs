//! 路由定义
//!
//! 管理 API 统一挂在 `/api/v1` 下：
//! - 资源：/inends、/outends、/devices、/plugins（同一组 handler，按类别注入）
//! - 点位表：/devices/{uuid}/points
//! - 规则：/rules，测试注入：/test-inject
//! - 系统：/metrics、/crons；健康检查在根路径 /health

use super::AppState;
use super::handlers::*;
use axum::{
    Extension, Router, middleware,
    routing::{get, post},
};
use domain::ResourceClass;
use tower_http::trace::TraceLayer;

/// 创建完整路由（含请求追踪中间件）
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", create_api_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(super::request_context))
}

/// 创建 API 路由
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/inends", resource_router(ResourceClass::Source))
        .nest("/outends", resource_router(ResourceClass::Target))
        .nest(
            "/devices",
            resource_router(ResourceClass::Device).merge(point_router()),
        )
        .nest("/plugins", resource_router(ResourceClass::Plugin))
        .route("/rules", get(list_rules).post(create_rule))
        .route(
            "/rules/:uuid",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/test-inject", post(test_inject))
        .route("/metrics", get(get_metrics))
        .route("/crons", get(list_crons))
}

fn resource_router(class: ResourceClass) -> Router<AppState> {
    Router::new()
        .route("/", get(list_resources).post(create_resource))
        .route(
            "/:uuid",
            get(get_resource).put(update_resource).delete(delete_resource),
        )
        .route("/:uuid/restart", post(restart_resource))
        .route("/:uuid/ctrl", post(ctrl_resource))
        .route("/:uuid/details", get(resource_details))
        .route("/:uuid/clients", get(list_clients))
        .layer(Extension(class))
}

fn point_router() -> Router<AppState> {
    Router::new().route(
        "/:uuid/points",
        get(list_points).post(upsert_point).delete(delete_points),
    )
}
