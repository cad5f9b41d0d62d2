//! 资源 handlers（源 / 目标 / 设备 / 插件共用）
//!
//! 资源类别由路由挂载时的 `Extension<ResourceClass>` 注入：
//! - GET    /{class}                  分页列出
//! - POST   /{class}                  创建并启动
//! - GET    /{class}/{uuid}           详情
//! - PUT    /{class}/{uuid}           停止后按新配置重建
//! - DELETE /{class}/{uuid}           删除（级联绑定规则）
//! - POST   /{class}/{uuid}/restart   重启
//! - POST   /{class}/{uuid}/ctrl      控制命令
//! - GET    /{class}/{uuid}/details   驱动自述
//! - GET    /{class}/{uuid}/clients   监听型源的客户端列表

use crate::AppState;
use crate::utils::{envelope, unsupported_error};
use api_contract::{CtrlRequest, PageQuery, ResourceRequest};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::Response,
};
use domain::ResourceClass;

pub async fn list_resources(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Query(page): Query<PageQuery>,
) -> Response {
    envelope(state.api.list_resources(class, page))
}

pub async fn create_resource(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Json(req): Json<ResourceRequest>,
) -> Response {
    envelope(state.api.create_resource(class, req).await)
}

pub async fn get_resource(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Path(uuid): Path<String>,
) -> Response {
    envelope(state.api.get_resource(class, &uuid))
}

pub async fn update_resource(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Path(uuid): Path<String>,
    Json(req): Json<ResourceRequest>,
) -> Response {
    envelope(state.api.update_resource(class, &uuid, req).await)
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Path(uuid): Path<String>,
) -> Response {
    envelope(state.api.delete_resource(class, &uuid).await)
}

pub async fn restart_resource(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Path(uuid): Path<String>,
) -> Response {
    envelope(state.api.restart_resource(class, &uuid).await)
}

pub async fn ctrl_resource(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Path(uuid): Path<String>,
    Json(req): Json<CtrlRequest>,
) -> Response {
    envelope(state.api.ctrl(class, &uuid, req).await)
}

pub async fn resource_details(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Path(uuid): Path<String>,
) -> Response {
    envelope(state.api.details(class, &uuid))
}

/// 只有南向源支持客户端列表
pub async fn list_clients(
    State(state): State<AppState>,
    Extension(class): Extension<ResourceClass>,
    Path(uuid): Path<String>,
) -> Response {
    if class != ResourceClass::Source {
        return unsupported_error(format!("{} does not list clients", class));
    }
    envelope(state.api.list_clients(&uuid).await)
}
