//! 点位表 handlers（挂在设备路由下）
//!
//! - GET    /devices/{uuid}/points   点位表 + 当前缓存值
//! - POST   /devices/{uuid}/points   新增或更新点位（写入后重启设备）
//! - DELETE /devices/{uuid}/points   按 UUID 批量删除

use crate::AppState;
use crate::utils::{bad_request_error, envelope};
use api_contract::PointRequest;
use axum::{
    Json,
    extract::{Path, State},
    response::Response,
};

#[derive(Debug, serde::Deserialize)]
pub struct DeletePointsRequest {
    pub uuids: Vec<String>,
}

pub async fn list_points(State(state): State<AppState>, Path(device): Path<String>) -> Response {
    envelope(state.api.list_points(&device).await)
}

pub async fn upsert_point(
    State(state): State<AppState>,
    Path(device): Path<String>,
    Json(req): Json<PointRequest>,
) -> Response {
    envelope(state.api.upsert_point(&device, req).await)
}

pub async fn delete_points(
    State(state): State<AppState>,
    Path(device): Path<String>,
    Json(req): Json<DeletePointsRequest>,
) -> Response {
    if req.uuids.is_empty() {
        return bad_request_error("uuids required");
    }
    envelope(state.api.delete_points(&device, req.uuids).await)
}
