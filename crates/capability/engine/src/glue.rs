//! 对外胶水接口
//!
//! HTTP 层只通过 [`GatewayApi`] 调用运行时核心，每个操作都返回统一的
//! `{code, msg, data}` 封装：
//! - 各类资源的 CRUD、重启、控制命令
//! - 测试注入
//! - 规则 CRUD
//! - 点位表 CRUD（写入后重启设备）与点位读取（拼接缓存中的当前值）

use crate::engine::RuleEngine;
use crate::error::EngineError;
use api_contract::{
    ApiResponse, CtrlRequest, PageDto, PageQuery, PointDto, PointRequest, ResourceDto,
    ResourceRequest, RuleDto, RuleRequest, TestInjectRequest,
};
use domain::{DataPoint, ResourceClass, ResourceState, ResourceWorker, Rule};
use edge_cache::point_value;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct GatewayApi {
    engine: Arc<RuleEngine>,
}

fn respond<T>(op: &str, result: Result<T, EngineError>) -> ApiResponse<T> {
    match result {
        Ok(data) => ApiResponse::success(data),
        Err(e) => {
            warn!(target: "edge.api", op = %op, kind = ?e.kind(), error = %e, "request failed");
            ApiResponse::error(e.kind(), e.to_string())
        }
    }
}

fn resource_to_dto((worker, state): (ResourceWorker, ResourceState)) -> ResourceDto {
    ResourceDto {
        uuid: worker.uuid,
        name: worker.name,
        type_tag: worker.type_tag,
        config: worker.config,
        description: worker.description,
        state,
    }
}

fn rule_to_dto(rule: Rule) -> RuleDto {
    RuleDto {
        uuid: rule.uuid,
        name: rule.name,
        source: rule.source,
        device: rule.device,
        targets: rule.targets,
        success: rule.success,
        actions: rule.actions,
        failed: rule.failed,
        description: rule.description,
    }
}

fn new_uuid(requested: Option<String>) -> String {
    requested
        .filter(|uuid| !uuid.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 配置原样下传；非对象（含缺省的 `null`）由资源管理器拒绝为 BadConfig。
fn request_to_worker(uuid: String, req: ResourceRequest) -> ResourceWorker {
    ResourceWorker {
        uuid,
        name: req.name,
        type_tag: req.type_tag,
        config: req.config,
        description: req.description,
    }
}

fn request_to_rule(uuid: String, req: RuleRequest) -> Rule {
    Rule {
        uuid,
        name: req.name,
        source: req.source.filter(|s| !s.is_empty()),
        device: req.device.filter(|s| !s.is_empty()),
        targets: req.targets,
        success: req.success,
        actions: req.actions,
        failed: req.failed,
        description: req.description,
    }
}

fn request_to_point(device: &str, uuid: String, req: PointRequest) -> DataPoint {
    DataPoint {
        uuid,
        device_uuid: device.to_string(),
        tag: req.tag,
        alias: req.alias,
        address: req.address,
        data_type: req.data_type,
        data_order: req.data_order,
        weight: req.weight.unwrap_or(1.0),
        frequency_ms: req.frequency_ms.unwrap_or(1000),
    }
}

impl GatewayApi {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    // -------- 资源 --------

    pub fn list_resources(&self, class: ResourceClass, page: PageQuery) -> ApiResponse<PageDto<ResourceDto>> {
        let (total, records) = self
            .engine
            .manager(class)
            .paginate(page.current, page.size);
        ApiResponse::success(PageDto {
            current: page.current,
            size: page.size,
            total,
            records: records.into_iter().map(resource_to_dto).collect(),
        })
    }

    pub fn get_resource(&self, class: ResourceClass, uuid: &str) -> ApiResponse<ResourceDto> {
        respond("get_resource", self.engine.get_resource(class, uuid).map(resource_to_dto))
    }

    pub async fn create_resource(&self, class: ResourceClass, req: ResourceRequest) -> ApiResponse<ResourceDto> {
        let uuid = new_uuid(req.uuid.clone());
        let worker = request_to_worker(uuid.clone(), req);
        let result = match self.engine.load_resource(class, worker).await {
            Ok(()) => self.engine.get_resource(class, &uuid),
            Err(e) => Err(e),
        };
        respond("create_resource", result.map(resource_to_dto))
    }

    pub async fn update_resource(&self, class: ResourceClass, uuid: &str, req: ResourceRequest) -> ApiResponse<ResourceDto> {
        let worker = request_to_worker(uuid.to_string(), req);
        let result = match self.engine.update_resource(class, worker).await {
            Ok(()) => self.engine.get_resource(class, uuid),
            Err(e) => Err(e),
        };
        respond("update_resource", result.map(resource_to_dto))
    }

    pub async fn delete_resource(&self, class: ResourceClass, uuid: &str) -> ApiResponse<String> {
        let result = self.engine.delete_resource(class, uuid).await;
        respond("delete_resource", result.map(|worker| worker.uuid))
    }

    pub async fn restart_resource(&self, class: ResourceClass, uuid: &str) -> ApiResponse<ResourceDto> {
        let result = match self.engine.restart_resource(class, uuid).await {
            Ok(()) => self.engine.get_resource(class, uuid),
            Err(e) => Err(e),
        };
        respond("restart_resource", result.map(resource_to_dto))
    }

    pub async fn ctrl(&self, class: ResourceClass, uuid: &str, req: CtrlRequest) -> ApiResponse<Value> {
        respond("ctrl", self.engine.ctrl(class, uuid, &req.cmd, &req.args).await)
    }

    /// 资源驱动的自述信息
    pub fn details(&self, class: ResourceClass, uuid: &str) -> ApiResponse<Value> {
        let result = self
            .engine
            .manager(class)
            .get_resource(uuid)
            .map(|instance| instance.details())
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()));
        respond("details", result)
    }

    pub async fn list_clients(&self, uuid: &str) -> ApiResponse<Value> {
        respond("list_clients", self.engine.list_clients(uuid).await)
    }

    pub fn test_inject(&self, req: TestInjectRequest) -> ApiResponse<String> {
        let result = self.engine.test_inject(&req.uuid, &req.data);
        respond("test_inject", result.map(|()| req.uuid))
    }

    // -------- 规则 --------

    pub fn list_rules(&self) -> ApiResponse<Vec<RuleDto>> {
        ApiResponse::success(self.engine.all_rules().into_iter().map(rule_to_dto).collect())
    }

    pub fn get_rule(&self, uuid: &str) -> ApiResponse<RuleDto> {
        respond("get_rule", self.engine.get_rule(uuid).map(rule_to_dto))
    }

    pub fn create_rule(&self, req: RuleRequest) -> ApiResponse<RuleDto> {
        let uuid = new_uuid(req.uuid.clone());
        if self.engine.get_rule(&uuid).is_ok() {
            return respond("create_rule", Err(EngineError::Busy(format!("duplicate rule: {}", uuid))));
        }
        let rule = request_to_rule(uuid, req);
        let result = self.engine.load_rule(rule.clone()).map(|()| rule_to_dto(rule));
        respond("create_rule", result)
    }

    /// 更新 = 校验新脚本后替换；校验失败时旧规则保持不变。
    pub fn update_rule(&self, uuid: &str, req: RuleRequest) -> ApiResponse<RuleDto> {
        let result = self.engine.get_rule(uuid).and_then(|_| {
            let rule = request_to_rule(uuid.to_string(), req);
            self.engine.load_rule(rule.clone()).map(|()| rule_to_dto(rule))
        });
        respond("update_rule", result)
    }

    pub fn delete_rule(&self, uuid: &str) -> ApiResponse<String> {
        respond("delete_rule", self.engine.remove_rule(uuid).map(|rule| rule.uuid))
    }

    // -------- 点位表 --------

    /// 点位表拼接缓存中的当前值；从未采集过的点位 `status` 为 1。
    pub async fn list_points(&self, device: &str) -> ApiResponse<Vec<PointDto>> {
        let cache = Arc::clone(&self.engine.context().cache);
        let result = self.engine.points(device).await.map(|points| {
            points
                .into_iter()
                .map(|point| {
                    let cached = point_value(&cache, device, &point.uuid);
                    match cached {
                        Some(value) => PointDto {
                            point,
                            value: value.value,
                            status: value.status,
                            err_msg: value.err_msg,
                            last_fetch_time: value.last_fetch_time,
                        },
                        None => PointDto {
                            point,
                            value: String::new(),
                            status: 1,
                            err_msg: "no data".to_string(),
                            last_fetch_time: 0,
                        },
                    }
                })
                .collect()
        });
        respond("list_points", result)
    }

    pub async fn upsert_point(&self, device: &str, req: PointRequest) -> ApiResponse<DataPoint> {
        let uuid = new_uuid(req.uuid.clone());
        let point = request_to_point(device, uuid, req);
        respond("upsert_point", self.engine.upsert_point(point).await)
    }

    pub async fn delete_points(&self, device: &str, uuids: Vec<String>) -> ApiResponse<usize> {
        respond("delete_points", self.engine.delete_points(device, &uuids).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_uuid_is_replaced() {
        assert_eq!(new_uuid(Some("R1".to_string())), "R1");
        assert_eq!(new_uuid(Some("  ".to_string())).len(), 36);
        assert_eq!(new_uuid(None).len(), 36);
    }

    #[test]
    fn null_config_is_passed_through() {
        let req = ResourceRequest {
            uuid: None,
            name: "s".to_string(),
            type_tag: "MQTT".to_string(),
            config: Value::Null,
            description: String::new(),
        };
        let worker = request_to_worker("S1".to_string(), req);
        assert!(worker.config.is_null());
    }
}
