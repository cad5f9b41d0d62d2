use edge_resource::ResourceManager;
use edge_script::TargetSink;
use std::sync::Arc;
use tracing::debug;

/// 脚本 `data:ToX` 的投递出口：按 UUID 找到北向目标并入队。
pub struct TargetRouter {
    targets: Arc<ResourceManager>,
}

impl TargetRouter {
    pub fn new(targets: Arc<ResourceManager>) -> Self {
        Self { targets }
    }
}

impl TargetSink for TargetRouter {
    fn submit(&self, kind: &str, target: &str, payload: String) -> Result<(), String> {
        let worker = self
            .targets
            .get_worker(target)
            .ok_or_else(|| format!("target not found: {}", target))?;
        if !worker.type_tag.eq_ignore_ascii_case(kind) {
            return Err(format!(
                "target {} is {}, not {}",
                target, worker.type_tag, kind
            ));
        }
        let instance = self
            .targets
            .get_resource(target)
            .ok_or_else(|| format!("target not found: {}", target))?;
        instance.to(payload).map_err(|e| e.to_string())?;
        debug!(target: "edge.engine", target_uuid = %target, kind = %kind, "script payload routed");
        Ok(())
    }
}
