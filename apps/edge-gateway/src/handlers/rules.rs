//! 规则 handlers
//!
//! - GET    /rules          列出
//! - POST   /rules          创建（校验脚本与绑定）
//! - GET    /rules/{uuid}   详情
//! - PUT    /rules/{uuid}   更新（校验失败时旧规则保持不变）
//! - DELETE /rules/{uuid}   删除
//! - POST   /test-inject    向源 / 设备注入一条测试记录（只执行不投递）

use crate::AppState;
use crate::utils::envelope;
use api_contract::{RuleRequest, TestInjectRequest};
use axum::{
    Json,
    extract::{Path, State},
    response::Response,
};

pub async fn list_rules(State(state): State<AppState>) -> Response {
    envelope(state.api.list_rules())
}

pub async fn create_rule(State(state): State<AppState>, Json(req): Json<RuleRequest>) -> Response {
    envelope(state.api.create_rule(req))
}

pub async fn get_rule(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    envelope(state.api.get_rule(&uuid))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Json(req): Json<RuleRequest>,
) -> Response {
    envelope(state.api.update_rule(&uuid, req))
}

pub async fn delete_rule(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    envelope(state.api.delete_rule(&uuid))
}

pub async fn test_inject(
    State(state): State<AppState>,
    Json(req): Json<TestInjectRequest>,
) -> Response {
    envelope(state.api.test_inject(req))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::http::StatusCode;

    fn rule(uuid: &str, source: &str, actions: &str) -> RuleRequest {
        RuleRequest {
            uuid: Some(uuid.to_string()),
            name: uuid.to_string(),
            source: Some(source.to_string()),
            device: None,
            targets: Vec::new(),
            success: String::new(),
            actions: actions.to_string(),
            failed: String::new(),
            description: String::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rule_bound_to_missing_source_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path()).await;
        let response = create_rule(
            State(state.clone()),
            Json(rule("R1", "ghost", "function Action(x) return x end")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get_rule(State(state), Path("R1".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inject_into_unknown_resource_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::state(dir.path()).await;
        let response = test_inject(
            State(state),
            Json(TestInjectRequest {
                uuid: "ghost".to_string(),
                data: "{}".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
