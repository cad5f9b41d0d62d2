//! HTTP 响应辅助函数
//!
//! 胶水接口返回的 `{code, msg, data}` 原样作为响应体，HTTP 状态码由业务码推出：
//! - 200 → 200
//! - 4004 → 404，4009 → 409，4003 → 422
//! - 其余 4xxx → 400，5002 → 502，其余 → 500

use api_contract::{ApiResponse, CODE_OK};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::ErrorKind;
use serde::Serialize;

/// 业务码 → HTTP 状态码
pub fn status_for(code: i32) -> StatusCode {
    match code {
        CODE_OK => StatusCode::OK,
        4004 => StatusCode::NOT_FOUND,
        4009 => StatusCode::CONFLICT,
        4003 => StatusCode::UNPROCESSABLE_ENTITY,
        5002 => StatusCode::BAD_GATEWAY,
        4000..=4999 => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 统一封装输出
pub fn envelope<T: Serialize>(response: ApiResponse<T>) -> Response {
    (status_for(response.code), Json(response)).into_response()
}

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    envelope(ApiResponse::<()>::error(ErrorKind::BadConfig, message))
}

pub fn unsupported_error(message: impl Into<String>) -> Response {
    envelope(ApiResponse::<()>::error(ErrorKind::Unsupported, message))
}
